//! Managed hardware streams
//!
//! A [`ManagedStream`] owns one hardware stream together with the data path
//! its callbacks feed. Dropping it tears the stream down: the hardware
//! stream is disconnected, the data path is detached, the ring buffer it
//! used is reset and the frame description is cleared, in that order.

use crate::audio::{
    AudioHardware, BufferAttrs, FrameInfoRegistry, HardwareError, RingBuffer, SampleSpec,
    SoundKind, SoundSource, StreamId, StreamKind, WorkerSignal,
};
use crate::error::Result;
use crate::message::AudioStreamInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a managed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Opened, waiting for the hardware to accept it
    Creating,
    Ready,
    Terminated,
    Failed,
}

impl StreamPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, StreamPhase::Terminated | StreamPhase::Failed)
    }
}

/// State carried by `AudioStreamInfo` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamInfoState {
    Created,
    Changed,
    Terminated,
}

/// Where a stream's callbacks move data
pub enum StreamPath {
    /// Notification sound file to the speaker
    Sound(SoundSource),
    /// Playback ring buffer to the speaker
    Voice { source: Arc<RingBuffer> },
    /// Microphone into the captured ring buffer, waking the filter worker
    Record {
        sink: Arc<RingBuffer>,
        signal: WorkerSignal,
    },
}

impl StreamPath {
    fn ring(&self) -> Option<&Arc<RingBuffer>> {
        match self {
            StreamPath::Sound(_) => None,
            StreamPath::Voice { source } => Some(source),
            StreamPath::Record { sink, .. } => Some(sink),
        }
    }
}

/// What a write-ready callback did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(usize),
    /// Last sound cycle queued, drain requested
    Draining,
    /// Nothing to do (draining or not a playback-direction stream)
    Idle,
}

/// One hardware stream and its data path
pub struct ManagedStream {
    kind: StreamKind,
    id: StreamId,
    phase: StreamPhase,
    spec: SampleSpec,
    hardware: Arc<dyn AudioHardware>,
    path: Option<StreamPath>,
    frame_info: Option<Arc<FrameInfoRegistry>>,
    info: Option<AudioStreamInfo>,
    draining: bool,
    scratch: Vec<u8>,
    bytes_moved: u64,
    silence_bytes: u64,
    dropped_bytes: u64,
}

impl ManagedStream {
    /// Open a hardware stream on `device` (`None` = hardware default)
    ///
    /// `frame_info` is cleared on teardown; pass it for the streams whose
    /// framing it describes.
    pub fn open(
        hardware: Arc<dyn AudioHardware>,
        kind: StreamKind,
        device: Option<&str>,
        spec: SampleSpec,
        fragment: usize,
        path: StreamPath,
        frame_info: Option<Arc<FrameInfoRegistry>>,
    ) -> Result<Self> {
        let attrs = BufferAttrs::for_fragment(fragment);
        let id = hardware.open_stream(kind, device, spec, attrs)?;
        debug!(
            "Opened {} stream {} on {} ({}, fragment {} bytes)",
            kind,
            id,
            device.unwrap_or("default device"),
            spec,
            fragment
        );

        Ok(Self {
            kind,
            id,
            phase: StreamPhase::Creating,
            spec,
            hardware,
            path: Some(path),
            frame_info,
            info: None,
            draining: false,
            scratch: Vec::new(),
            bytes_moved: 0,
            silence_bytes: 0,
            dropped_bytes: 0,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn spec(&self) -> SampleSpec {
        self.spec
    }

    /// Last published stream metadata
    pub fn info(&self) -> Option<AudioStreamInfo> {
        self.info
    }

    /// Sound being played, for playback streams
    pub fn sound(&self) -> Option<SoundKind> {
        match &self.path {
            Some(StreamPath::Sound(source)) => Some(source.kind()),
            _ => None,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Hardware accepted the stream; returns the `Created` info to publish
    pub fn on_ready(&mut self) -> Result<AudioStreamInfo> {
        self.phase = StreamPhase::Ready;
        let info = self.fetch_info(StreamInfoState::Created)?;
        info!(
            "{} stream {} ready on device #{} (volume {})",
            self.kind, self.id, info.device_index, info.volume
        );
        Ok(info)
    }

    /// Hardware-side volume or device change; returns the `Changed` info
    pub fn on_changed(&mut self) -> Result<AudioStreamInfo> {
        self.fetch_info(StreamInfoState::Changed)
    }

    /// Mark the stream gone on the hardware side
    pub fn on_terminated(&mut self) {
        self.phase = StreamPhase::Terminated;
    }

    pub fn on_failed(&mut self, reason: &str) {
        warn!("{} stream {} failed: {}", self.kind, self.id, reason);
        self.phase = StreamPhase::Failed;
    }

    /// `Terminated` info for the stream's last published state
    pub fn terminated_info(&self) -> AudioStreamInfo {
        let mut info = self.info.unwrap_or(AudioStreamInfo {
            kind: self.kind,
            state: StreamInfoState::Terminated,
            device_index: 0,
            volume: 0,
            volume_steps: 0,
            channels: self.spec.channels,
            has_volume: false,
            volume_writable: false,
        });
        info.state = StreamInfoState::Terminated;
        info
    }

    fn fetch_info(&mut self, state: StreamInfoState) -> Result<AudioStreamInfo> {
        let meta = self.hardware.stream_metadata(self.id)?;
        let info = AudioStreamInfo {
            kind: self.kind,
            state,
            device_index: meta.device_index,
            volume: meta.volume,
            volume_steps: meta.volume_steps,
            channels: meta.channels,
            has_volume: meta.has_volume,
            volume_writable: meta.volume_writable,
        };
        self.info = Some(info);
        Ok(info)
    }

    pub fn set_volume(&self, volume: u32) -> Result<()> {
        self.hardware.set_stream_volume(self.id, volume)?;
        Ok(())
    }

    /// Hardware wants `bytes` more data
    pub fn on_write_ready(&mut self, bytes: usize) -> Result<WriteOutcome> {
        if self.phase != StreamPhase::Ready || self.draining || bytes == 0 {
            return Ok(WriteOutcome::Idle);
        }

        let block_align = self.spec.channels.max(1) as usize * 2;
        let bytes = bytes - bytes % block_align;
        self.scratch.clear();

        match &mut self.path {
            Some(StreamPath::Sound(source)) => {
                let filled = source.fill(&mut self.scratch, bytes)?;
                if filled > 0 {
                    self.hardware.write(self.id, &self.scratch)?;
                    self.bytes_moved += filled as u64;
                }
                if source.is_finished() {
                    self.hardware.drain(self.id)?;
                    self.draining = true;
                    debug!("{} stream {}: sound finished, draining", self.kind, self.id);
                    return Ok(WriteOutcome::Draining);
                }
                Ok(WriteOutcome::Written(filled))
            }
            Some(StreamPath::Voice { source }) => {
                self.scratch.resize(bytes, 0);
                let mut offset = 0;
                while offset < bytes {
                    // Re-read the framing for every chunk
                    let Some(frame) = self.frame_info.as_ref().and_then(|r| r.snapshot()) else {
                        break;
                    };
                    let chunk = frame.buffer_size.min(bytes - offset);
                    if chunk == 0 || !source.read(&mut self.scratch[offset..offset + chunk]) {
                        break;
                    }
                    offset += chunk;
                }
                // Underflow: remainder stays zeroed
                self.silence_bytes += (bytes - offset) as u64;
                self.bytes_moved += offset as u64;
                self.hardware.write(self.id, &self.scratch)?;
                Ok(WriteOutcome::Written(bytes))
            }
            Some(StreamPath::Record { .. }) | None => Ok(WriteOutcome::Idle),
        }
    }

    /// Captured data is ready; moves all of it into the captured buffer
    pub fn on_read_ready(&mut self) -> Result<usize> {
        if self.phase != StreamPhase::Ready {
            return Ok(0);
        }
        let Some(StreamPath::Record { sink, signal }) = &self.path else {
            return Ok(0);
        };

        self.scratch.clear();
        let read = self.hardware.read(self.id, &mut self.scratch)?;
        if read == 0 {
            return Ok(0);
        }

        if sink.write(&self.scratch[..read]) {
            self.bytes_moved += read as u64;
        } else {
            self.dropped_bytes += read as u64;
            debug!(
                "Captured buffer full, dropping {} bytes ({} free)",
                read,
                sink.free()
            );
        }
        signal.notify();
        Ok(read)
    }

    pub fn on_overflow(&self) {
        trace!("{} stream {} overflow", self.kind, self.id);
    }

    pub fn on_underflow(&self) {
        trace!("{} stream {} underflow", self.kind, self.id);
    }
}

impl Drop for ManagedStream {
    fn drop(&mut self) {
        if !self.phase.is_finished() {
            match self.hardware.disconnect(self.id) {
                Ok(()) | Err(HardwareError::UnknownStream(_)) => {}
                Err(e) => warn!("Failed to disconnect {} stream {}: {}", self.kind, self.id, e),
            }
        }

        if let Some(path) = self.path.take() {
            if let Some(ring) = path.ring() {
                let usage = ring.usage();
                debug!(
                    "{} buffer high water {}/{} bytes, {} rejected writes",
                    self.kind, usage.high_water, usage.capacity, usage.rejected_writes
                );
                ring.reset();
            }
        }

        if let Some(registry) = &self.frame_info {
            registry.clear();
        }

        info!(
            "{} stream {} closed ({} bytes moved, {} silence, {} dropped)",
            self.kind, self.id, self.bytes_moved, self.silence_bytes, self.dropped_bytes
        );
    }
}

impl fmt::Debug for ManagedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedStream")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("spec", &self.spec)
            .finish()
    }
}
