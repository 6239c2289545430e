//! Noise filter worker: captured audio in, filtered audio out

use crate::audio::{FrameInfoRegistry, NoiseFilter, RingBuffer, VoiceBuffers, VoiceFrameInfo};
use crate::message::{emit, AudioRecordLevel, EventSink, Payload};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Upper bound on one wait, so a lost wakeup only delays processing
const WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// Wakeup flag shared between the record stream and the worker thread
#[derive(Clone, Default)]
pub struct WorkerSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl WorkerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the worker because new captured data is available
    pub fn notify(&self) {
        let (pending, condvar) = &*self.inner;
        *pending.lock() = true;
        condvar.notify_one();
    }

    /// Block until notified or `timeout` elapses; returns whether a
    /// notification was consumed
    fn wait(&self, timeout: Duration) -> bool {
        let (pending, condvar) = &*self.inner;
        let mut pending = pending.lock();
        if !*pending {
            condvar.wait_for(&mut pending, timeout);
        }
        std::mem::take(&mut *pending)
    }
}

impl std::fmt::Debug for WorkerSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSignal").finish_non_exhaustive()
    }
}

/// Worker tunables
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Capacity of the filtered buffer in frames
    pub filtered_buffer_frames: usize,
    /// Minimum spacing of level reports
    pub level_report_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            filtered_buffer_frames: 10,
            level_report_interval: Duration::from_millis(200),
        }
    }
}

/// Bytes handed to the filter per call for the given frame geometry
///
/// Every supported latency class maps to 10 ms blocks.
pub fn chunk_size(info: &VoiceFrameInfo) -> usize {
    let size = match info.latency_us {
        40_000 => info.buffer_size / 4,
        20_000 => info.buffer_size / 2,
        10_000 => info.buffer_size,
        5_000 => info.buffer_size * 2,
        _ => info.buffer_size,
    };
    let align = info.block_align().max(1);
    (size - size % align).max(align)
}

/// Dedicated thread draining captured audio through a [`NoiseFilter`]
pub struct NoiseFilterWorker {
    captured: Arc<RingBuffer>,
    filtered: Arc<RingBuffer>,
    frame_info: Arc<FrameInfoRegistry>,
    signal: WorkerSignal,
    filter: Arc<Mutex<Box<dyn NoiseFilter>>>,
    events: EventSink,
    config: WorkerConfig,
    stop_flag: Arc<AtomicBool>,
    level_reports: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl NoiseFilterWorker {
    pub fn new(
        buffers: &VoiceBuffers,
        filter: Box<dyn NoiseFilter>,
        events: EventSink,
        config: WorkerConfig,
    ) -> Self {
        Self {
            captured: buffers.captured.clone(),
            filtered: buffers.filtered.clone(),
            frame_info: buffers.frame_info.clone(),
            signal: WorkerSignal::new(),
            filter: Arc::new(Mutex::new(filter)),
            events,
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
            level_reports: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Handle used by the record stream to wake the worker
    pub fn signal(&self) -> WorkerSignal {
        self.signal.clone()
    }

    pub fn notify(&self) {
        self.signal.notify();
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Attach or detach the level report subscriber
    pub fn set_level_reports(&self, enabled: bool) {
        self.level_reports.store(enabled, Ordering::SeqCst);
    }

    /// Size the filtered buffer for `info` and start the thread
    ///
    /// Starting a running worker is a no-op.
    pub fn start(&self, info: &VoiceFrameInfo) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            debug!("Noise filter worker already running");
            return;
        }

        self.filtered
            .init(self.config.filtered_buffer_frames * info.buffer_size);
        self.filter.lock().reset();
        self.stop_flag.store(false, Ordering::SeqCst);

        let filter_loop = FilterLoop {
            captured: self.captured.clone(),
            filtered: self.filtered.clone(),
            frame_info: self.frame_info.clone(),
            signal: self.signal.clone(),
            filter: self.filter.clone(),
            events: self.events.clone(),
            stop_flag: self.stop_flag.clone(),
            level_reports: self.level_reports.clone(),
            report_interval: self.config.level_report_interval,
        };
        *handle = Some(thread::spawn(move || filter_loop.run()));

        info!("Noise filter worker started ({})", info);
    }

    /// Stop the thread, log buffer usage and reset the filtered buffer
    pub fn stop(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };

        self.stop_flag.store(true, Ordering::SeqCst);
        self.signal.notify();
        if handle.join().is_err() {
            warn!("Noise filter thread panicked");
        }

        let usage = self.filtered.usage();
        info!(
            "Noise filter worker stopped (filtered buffer high water {}/{} bytes, {} dropped writes)",
            usage.high_water, usage.capacity, usage.rejected_writes
        );
        self.filtered.reset();

        if self.level_reports.load(Ordering::SeqCst) {
            emit(
                &self.events,
                Payload::AudioRecordLevel(AudioRecordLevel { max: 0, time_ms: 0 }),
            );
        }
    }
}

impl Drop for NoiseFilterWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved into the worker thread
struct FilterLoop {
    captured: Arc<RingBuffer>,
    filtered: Arc<RingBuffer>,
    frame_info: Arc<FrameInfoRegistry>,
    signal: WorkerSignal,
    filter: Arc<Mutex<Box<dyn NoiseFilter>>>,
    events: EventSink,
    stop_flag: Arc<AtomicBool>,
    level_reports: Arc<AtomicBool>,
    report_interval: Duration,
}

impl FilterLoop {
    fn run(self) {
        debug!("Noise filter thread started");

        let mut bytes = Vec::new();
        let mut samples: Vec<i16> = Vec::new();
        let mut level_max: u16 = 0;
        let mut window_start = Instant::now();
        let mut processed: u64 = 0;
        let mut dropped: u64 = 0;

        while !self.stop_flag.load(Ordering::SeqCst) {
            self.signal.wait(WAIT_TIMEOUT);
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }

            // Fresh snapshot for every chunk
            while let Some(info) = self.frame_info.snapshot() {
                let chunk = chunk_size(&info);
                bytes.resize(chunk, 0);
                if !self.captured.read(&mut bytes) {
                    break;
                }

                samples.clear();
                samples.extend(
                    bytes
                        .chunks_exact(2)
                        .map(|b| i16::from_le_bytes([b[0], b[1]])),
                );

                self.filter
                    .lock()
                    .process(&mut samples, info.channels.max(1) as usize);

                for (out, sample) in bytes.chunks_exact_mut(2).zip(&samples) {
                    out.copy_from_slice(&sample.to_le_bytes());
                    if *sample > 0 {
                        level_max = level_max.max(*sample as u16);
                    }
                }

                if self.filtered.write(&bytes) {
                    processed += chunk as u64;
                } else {
                    dropped += 1;
                    trace!("Filtered buffer full, dropping {} bytes", chunk);
                }
            }

            if self.level_reports.load(Ordering::SeqCst) {
                let elapsed = window_start.elapsed();
                if elapsed >= self.report_interval {
                    emit(
                        &self.events,
                        Payload::AudioRecordLevel(AudioRecordLevel {
                            max: level_max,
                            time_ms: elapsed.as_millis() as u32,
                        }),
                    );
                    level_max = 0;
                    window_start = Instant::now();
                }
            } else {
                level_max = 0;
                window_start = Instant::now();
            }
        }

        debug!(
            "Noise filter thread exiting ({} bytes filtered, {} chunks dropped)",
            processed, dropped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Bypass;
    use crate::message::Message;
    use crossbeam_channel::{unbounded, Receiver};

    fn setup(config: WorkerConfig) -> (VoiceBuffers, NoiseFilterWorker, Receiver<Message>) {
        let buffers = VoiceBuffers::new();
        let info = VoiceFrameInfo::from_latency_ms(20, 1, 48000);
        buffers.frame_info.set(info);
        buffers.captured.init(10 * info.buffer_size);

        let (tx, rx) = unbounded();
        let worker = NoiseFilterWorker::new(&buffers, Box::new(Bypass), tx, config);
        (buffers, worker, rx)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_chunk_size_by_latency() {
        let frame_40 = VoiceFrameInfo::from_latency_ms(40, 1, 48000);
        let frame_20 = VoiceFrameInfo::from_latency_ms(20, 2, 48000);
        let frame_10 = VoiceFrameInfo::from_latency_ms(10, 1, 48000);
        let frame_5 = VoiceFrameInfo::from_latency_ms(5, 1, 48000);
        let frame_60 = VoiceFrameInfo::from_latency_ms(60, 1, 48000);

        assert_eq!(chunk_size(&frame_40), frame_40.buffer_size / 4);
        assert_eq!(chunk_size(&frame_20), frame_20.buffer_size / 2);
        assert_eq!(chunk_size(&frame_10), frame_10.buffer_size);
        assert_eq!(chunk_size(&frame_5), frame_5.buffer_size * 2);
        assert_eq!(chunk_size(&frame_60), frame_60.buffer_size);
    }

    #[test]
    fn test_filters_captured_into_filtered() {
        let (buffers, worker, _rx) = setup(WorkerConfig::default());
        let info = buffers.frame_info.snapshot().unwrap();
        worker.start(&info);
        assert!(worker.is_running());
        assert_eq!(buffers.filtered.capacity(), 10 * info.buffer_size);

        let data: Vec<u8> = (0..info.buffer_size).map(|i| (i % 200) as u8).collect();
        assert!(buffers.captured.write(&data));
        worker.notify();

        assert!(wait_for(|| buffers.filtered.available() == info.buffer_size));
        let mut out = vec![0u8; info.buffer_size];
        assert!(buffers.filtered.read(&mut out));
        assert_eq!(out, data);

        worker.stop();
        assert!(!worker.is_running());
        assert_eq!(buffers.filtered.available(), 0);
    }

    #[test]
    fn test_level_reports() {
        let config = WorkerConfig {
            filtered_buffer_frames: 10,
            level_report_interval: Duration::ZERO,
        };
        let (buffers, worker, rx) = setup(config);
        let info = buffers.frame_info.snapshot().unwrap();
        worker.set_level_reports(true);
        worker.start(&info);

        let samples: Vec<u8> = [100i16, -3000, 1000, 5]
            .iter()
            .cycle()
            .take(info.sample_count)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert!(buffers.captured.write(&samples));
        worker.notify();

        let mut seen = false;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(message) = rx.recv_timeout(Duration::from_millis(100)) {
                if let Payload::AudioRecordLevel(level) = message.payload {
                    if level.max == 1000 {
                        seen = true;
                        break;
                    }
                }
            }
        }
        assert!(seen);

        worker.stop();
        let last = rx
            .try_iter()
            .filter_map(|m| match m.payload {
                Payload::AudioRecordLevel(level) => Some(level),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(last, AudioRecordLevel { max: 0, time_ms: 0 });
    }

    #[test]
    fn test_start_is_idempotent() {
        let (buffers, worker, _rx) = setup(WorkerConfig::default());
        let info = buffers.frame_info.snapshot().unwrap();
        worker.start(&info);
        assert!(buffers.filtered.write(&[1, 2]));
        worker.start(&info);
        assert_eq!(buffers.filtered.available(), 2);
        worker.stop();
        worker.stop();
    }
}
