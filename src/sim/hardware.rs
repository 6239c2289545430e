//! Simulated audio hardware driven by a clock thread

use crate::audio::{
    AudioHardware, BufferAttrs, EventHandler, HardwareDevice, HardwareError, HardwareEvent,
    SampleSpec, StreamId, StreamKind, StreamMetadata,
};
use crate::device::DeviceType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Tick of the simulated sound card
const TICK: Duration = Duration::from_millis(10);

/// Frequency and amplitude of the synthetic microphone signal
const MIC_TONE_HZ: f32 = 440.0;
const MIC_TONE_AMPLITUDE: f32 = 3000.0;

struct SimStream {
    kind: StreamKind,
    spec: SampleSpec,
    device_index: u32,
    attrs: BufferAttrs,
    ready: bool,
    draining: bool,
    /// Bytes written but not yet "played"
    queued: usize,
    played: u64,
    captured: Vec<u8>,
    phase: f32,
    volume: u32,
}

impl SimStream {
    /// Advance one tick, collecting the events the stream raises
    fn tick(&mut self, id: StreamId, events: &mut Vec<HardwareEvent>) {
        if !self.ready {
            self.ready = true;
            events.push(HardwareEvent::StreamReady(id));
            return;
        }

        let step = self.spec.bytes_for_us(TICK.as_micros() as u64);
        match self.kind {
            StreamKind::Playback | StreamKind::Voice => {
                let consumed = step.min(self.queued);
                self.queued -= consumed;
                self.played += consumed as u64;

                if self.draining {
                    if self.queued == 0 {
                        self.draining = false;
                        events.push(HardwareEvent::StreamDrained(id));
                    }
                    return;
                }
                if consumed < step && self.played > 0 {
                    events.push(HardwareEvent::StreamUnderflow(id));
                }
                let target = self.attrs.target_length as usize;
                if self.queued < target {
                    events.push(HardwareEvent::StreamWriteReady {
                        stream: id,
                        bytes: target - self.queued,
                    });
                }
            }
            StreamKind::Record => {
                self.synthesize(step);
                if self.captured.len() > self.attrs.max_length as usize {
                    let excess = self.captured.len() - self.attrs.max_length as usize;
                    self.captured.drain(..excess);
                    events.push(HardwareEvent::StreamOverflow(id));
                }
                if self.captured.len() >= self.attrs.fragment_size as usize {
                    events.push(HardwareEvent::StreamReadReady {
                        stream: id,
                        bytes: self.captured.len(),
                    });
                }
            }
        }
    }

    fn synthesize(&mut self, bytes: usize) {
        let channels = self.spec.channels.max(1) as usize;
        let frames = bytes / (channels * 2);
        let advance = 2.0 * PI * MIC_TONE_HZ / self.spec.rate.max(1) as f32;
        for _ in 0..frames {
            let sample = (self.phase.sin() * MIC_TONE_AMPLITUDE) as i16;
            for _ in 0..channels {
                self.captured.extend_from_slice(&sample.to_le_bytes());
            }
            self.phase = (self.phase + advance) % (2.0 * PI);
        }
    }
}

#[derive(Default)]
struct SimState {
    devices: Vec<HardwareDevice>,
    streams: HashMap<StreamId, SimStream>,
    next_id: StreamId,
}

struct Shared {
    state: Mutex<SimState>,
    handler: Mutex<Option<EventHandler>>,
    running: AtomicBool,
}

impl Shared {
    /// Handlers run without the state lock held, so they may call back in
    fn deliver(&self, events: Vec<HardwareEvent>) {
        if events.is_empty() {
            return;
        }
        let Some(handler) = self.handler.lock().clone() else {
            return;
        };
        for event in events {
            trace!("sim event {:?}", event);
            handler(event);
        }
    }
}

/// Sound card with two sinks and one microphone playing a steady tone
pub struct SimHardware {
    shared: Arc<Shared>,
    clock: Mutex<Option<JoinHandle<()>>>,
}

impl SimHardware {
    pub fn new() -> Self {
        let devices = vec![
            sim_device(DeviceType::Sink, 0, 1, "sim.speaker", "Simulated Speaker"),
            sim_device(DeviceType::Sink, 1, 2, "sim.handset", "Simulated Handset"),
            sim_device(DeviceType::Source, 0, 3, "sim.microphone", "Simulated Microphone"),
        ];
        let shared = Arc::new(Shared {
            state: Mutex::new(SimState {
                devices,
                ..SimState::default()
            }),
            handler: Mutex::new(None),
            running: AtomicBool::new(true),
        });

        let clock_shared = shared.clone();
        let clock = thread::Builder::new()
            .name("sim-clock".into())
            .spawn(move || clock_loop(clock_shared))
            .ok();
        info!("Simulated audio hardware started");

        Self {
            shared,
            clock: Mutex::new(clock),
        }
    }

    /// Unplug a device, raising `DeviceRemoved`
    pub fn unplug(&self, kind: DeviceType, index: u32) {
        let removed = {
            let mut state = self.shared.state.lock();
            let before = state.devices.len();
            state.devices.retain(|d| !(d.kind == kind && d.index == index));
            state.devices.len() != before
        };
        if removed {
            self.shared
                .deliver(vec![HardwareEvent::DeviceRemoved { kind, index }]);
        }
    }

    /// Total bytes consumed by a playback-direction stream
    pub fn played(&self, stream: StreamId) -> u64 {
        self.shared
            .state
            .lock()
            .streams
            .get(&stream)
            .map(|s| s.played)
            .unwrap_or(0)
    }

    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.clock.lock().take() {
            // the last reference may be released from a handler on the clock thread
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            debug!("Simulated audio clock stopped");
        }
    }
}

impl Default for SimHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimHardware {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sim_device(
    kind: DeviceType,
    card_index: u32,
    index: u32,
    name: &str,
    description: &str,
) -> HardwareDevice {
    HardwareDevice {
        card_index,
        kind,
        index,
        name: name.to_string(),
        description: description.to_string(),
        channels: 2,
        base_volume: 65536,
        volume: 65536,
        volume_steps: 65537,
    }
}

fn clock_loop(shared: Arc<Shared>) {
    let mut events = Vec::new();
    while shared.running.load(Ordering::SeqCst) {
        thread::sleep(TICK);
        {
            let mut state = shared.state.lock();
            for (id, stream) in state.streams.iter_mut() {
                stream.tick(*id, &mut events);
            }
        }
        shared.deliver(std::mem::take(&mut events));
    }
}

impl AudioHardware for SimHardware {
    fn subscribe(&self, handler: EventHandler) {
        *self.shared.handler.lock() = Some(handler);
    }

    fn enumerate_devices(&self) -> Result<Vec<HardwareDevice>, HardwareError> {
        Ok(self.shared.state.lock().devices.clone())
    }

    fn open_stream(
        &self,
        kind: StreamKind,
        device: Option<&str>,
        spec: SampleSpec,
        attrs: BufferAttrs,
    ) -> Result<StreamId, HardwareError> {
        let mut state = self.shared.state.lock();
        let device_index = state
            .devices
            .iter()
            .filter(|d| d.kind == kind.device_type())
            .find(|d| device.map_or(true, |name| d.name == name))
            .map(|d| d.index)
            .ok_or_else(|| HardwareError::Connect {
                kind,
                message: format!("no device {}", device.unwrap_or("(default)")),
            })?;

        state.next_id += 1;
        let id = state.next_id;
        state.streams.insert(
            id,
            SimStream {
                kind,
                spec,
                device_index,
                attrs,
                ready: false,
                draining: false,
                queued: 0,
                played: 0,
                captured: Vec::new(),
                phase: 0.0,
                volume: 65536,
            },
        );
        debug!("sim: opened {} stream {} ({})", kind, id, spec);
        Ok(id)
    }

    fn write(&self, stream: StreamId, data: &[u8]) -> Result<(), HardwareError> {
        let mut state = self.shared.state.lock();
        let s = state
            .streams
            .get_mut(&stream)
            .ok_or(HardwareError::UnknownStream(stream))?;
        s.queued += data.len();
        Ok(())
    }

    fn read(&self, stream: StreamId, out: &mut Vec<u8>) -> Result<usize, HardwareError> {
        let mut state = self.shared.state.lock();
        let s = state
            .streams
            .get_mut(&stream)
            .ok_or(HardwareError::UnknownStream(stream))?;
        let read = s.captured.len();
        out.append(&mut s.captured);
        Ok(read)
    }

    fn drain(&self, stream: StreamId) -> Result<(), HardwareError> {
        let mut state = self.shared.state.lock();
        let s = state
            .streams
            .get_mut(&stream)
            .ok_or(HardwareError::UnknownStream(stream))?;
        s.draining = true;
        Ok(())
    }

    fn disconnect(&self, stream: StreamId) -> Result<(), HardwareError> {
        let removed = self.shared.state.lock().streams.remove(&stream);
        match removed {
            Some(s) => {
                debug!("sim: closed {} stream {}, {} bytes played", s.kind, stream, s.played);
                Ok(())
            }
            None => Err(HardwareError::UnknownStream(stream)),
        }
    }

    fn stream_metadata(&self, stream: StreamId) -> Result<StreamMetadata, HardwareError> {
        let state = self.shared.state.lock();
        let s = state
            .streams
            .get(&stream)
            .ok_or(HardwareError::UnknownStream(stream))?;
        Ok(StreamMetadata {
            device_index: s.device_index,
            volume: s.volume,
            volume_steps: 65537,
            channels: s.spec.channels,
            has_volume: true,
            volume_writable: true,
        })
    }

    fn set_stream_volume(&self, stream: StreamId, volume: u32) -> Result<(), HardwareError> {
        let mut state = self.shared.state.lock();
        let s = state
            .streams
            .get_mut(&stream)
            .ok_or(HardwareError::UnknownStream(stream))?;
        s.volume = volume;
        Ok(())
    }

    fn set_device_volume(
        &self,
        kind: DeviceType,
        index: u32,
        _channels: u8,
        volume: u32,
    ) -> Result<(), HardwareError> {
        let mut state = self.shared.state.lock();
        let device = state
            .devices
            .iter_mut()
            .find(|d| d.kind == kind && d.index == index)
            .ok_or(HardwareError::UnknownDevice { kind, index })?;
        device.volume = volume;
        Ok(())
    }
}
