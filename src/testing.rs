//! Test doubles for the hardware and signaling interfaces

use crate::audio::{
    AudioHardware, BufferAttrs, EventHandler, HardwareDevice, HardwareError, HardwareEvent,
    SampleSpec, StreamId, StreamKind, StreamMetadata,
};
use crate::call::{
    CallControl, CallEnd, CallSignaling, FriendNumber, SendFrameError, SignalingError,
    SignalingEvent,
};
use crate::device::DeviceType;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Two-channel device with a 0 dB base volume of 65536
pub fn hw_device(kind: DeviceType, card_index: u32, index: u32, name: &str) -> HardwareDevice {
    HardwareDevice {
        card_index,
        kind,
        index,
        name: name.to_string(),
        description: format!("Test {}", name),
        channels: 2,
        base_volume: 65536,
        volume: 65536,
        volume_steps: 65537,
    }
}

/// Hardware call recorded by [`MockHardware`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareCall {
    Open {
        kind: StreamKind,
        device: Option<String>,
    },
    Drain(StreamId),
    Disconnect(StreamId),
    SetStreamVolume {
        stream: StreamId,
        volume: u32,
    },
    SetDeviceVolume {
        kind: DeviceType,
        index: u32,
        channels: u8,
        volume: u32,
    },
}

#[derive(Default)]
struct MockState {
    devices: Vec<HardwareDevice>,
    calls: Vec<HardwareCall>,
    next_id: StreamId,
    streams: HashMap<StreamId, (StreamKind, SampleSpec)>,
    last: HashMap<StreamKind, StreamId>,
    written: HashMap<StreamId, Vec<u8>>,
    capture: HashMap<StreamId, Vec<u8>>,
    failing: HashSet<StreamKind>,
}

/// Recording hardware that never raises callbacks on its own
#[derive(Default)]
pub struct MockHardware {
    state: Mutex<MockState>,
    handler: Mutex<Option<EventHandler>>,
}

impl MockHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<HardwareDevice>) -> Self {
        let hw = Self::new();
        hw.state.lock().devices = devices;
        hw
    }

    pub fn calls(&self) -> Vec<HardwareCall> {
        self.state.lock().calls.clone()
    }

    /// Everything written to a stream so far
    pub fn written(&self, stream: StreamId) -> Vec<u8> {
        self.state
            .lock()
            .written
            .get(&stream)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every later open of `kind` fail to connect
    pub fn fail_open(&self, kind: StreamKind) {
        self.state.lock().failing.insert(kind);
    }

    /// Number of open attempts for `kind`, failed ones included
    pub fn open_attempts(&self, kind: StreamKind) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, HardwareCall::Open { kind: k, .. } if *k == kind))
            .count()
    }

    /// Most recently opened stream of a kind
    pub fn last_stream(&self, kind: StreamKind) -> Option<StreamId> {
        self.state.lock().last.get(&kind).copied()
    }

    /// Queue captured data for the next `read`
    pub fn push_capture(&self, stream: StreamId, data: &[u8]) {
        self.state
            .lock()
            .capture
            .entry(stream)
            .or_default()
            .extend_from_slice(data);
    }

    /// Raise an event through the subscribed handler
    pub fn deliver(&self, event: HardwareEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

impl AudioHardware for MockHardware {
    fn subscribe(&self, handler: EventHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn enumerate_devices(&self) -> Result<Vec<HardwareDevice>, HardwareError> {
        Ok(self.state.lock().devices.clone())
    }

    fn open_stream(
        &self,
        kind: StreamKind,
        device: Option<&str>,
        spec: SampleSpec,
        _attrs: BufferAttrs,
    ) -> Result<StreamId, HardwareError> {
        let mut state = self.state.lock();
        state.calls.push(HardwareCall::Open {
            kind,
            device: device.map(str::to_string),
        });
        if state.failing.contains(&kind) {
            return Err(HardwareError::Connect {
                kind,
                message: "scripted failure".to_string(),
            });
        }
        state.next_id += 1;
        let id = state.next_id;
        state.streams.insert(id, (kind, spec));
        state.last.insert(kind, id);
        Ok(id)
    }

    fn write(&self, stream: StreamId, data: &[u8]) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        if !state.streams.contains_key(&stream) {
            return Err(HardwareError::UnknownStream(stream));
        }
        state
            .written
            .entry(stream)
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn read(&self, stream: StreamId, out: &mut Vec<u8>) -> Result<usize, HardwareError> {
        let mut state = self.state.lock();
        let data = state.capture.remove(&stream).unwrap_or_default();
        out.extend_from_slice(&data);
        Ok(data.len())
    }

    fn drain(&self, stream: StreamId) -> Result<(), HardwareError> {
        self.state.lock().calls.push(HardwareCall::Drain(stream));
        Ok(())
    }

    fn disconnect(&self, stream: StreamId) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        state.calls.push(HardwareCall::Disconnect(stream));
        state
            .streams
            .remove(&stream)
            .map(|_| ())
            .ok_or(HardwareError::UnknownStream(stream))
    }

    fn stream_metadata(&self, stream: StreamId) -> Result<StreamMetadata, HardwareError> {
        let state = self.state.lock();
        let (kind, spec) = state
            .streams
            .get(&stream)
            .ok_or(HardwareError::UnknownStream(stream))?;
        let device_index = state
            .devices
            .iter()
            .find(|d| d.kind == kind.device_type())
            .map(|d| d.index)
            .unwrap_or(0);
        Ok(StreamMetadata {
            device_index,
            volume: 65536,
            volume_steps: 65537,
            channels: spec.channels,
            has_volume: true,
            volume_writable: true,
        })
    }

    fn set_stream_volume(&self, stream: StreamId, volume: u32) -> Result<(), HardwareError> {
        self.state
            .lock()
            .calls
            .push(HardwareCall::SetStreamVolume { stream, volume });
        Ok(())
    }

    fn set_device_volume(
        &self,
        kind: DeviceType,
        index: u32,
        channels: u8,
        volume: u32,
    ) -> Result<(), HardwareError> {
        self.state.lock().calls.push(HardwareCall::SetDeviceVolume {
            kind,
            index,
            channels,
            volume,
        });
        Ok(())
    }
}

/// Signaling request recorded by [`ScriptedSignaling`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingRequest {
    Call(FriendNumber),
    Answer(FriendNumber),
    Control(FriendNumber, CallControl),
    EndCause(FriendNumber, CallEnd),
    Frame { friend: FriendNumber, samples: usize },
}

struct Script {
    requests: Vec<SignalingRequest>,
    call_error: Option<SignalingError>,
    answer_error: Option<SignalingError>,
    frame_results: VecDeque<Result<(), SendFrameError>>,
    events: Vec<SignalingEvent>,
    interval: Duration,
}

/// Signaling double with scripted results; clones share one script
#[derive(Clone)]
pub struct ScriptedSignaling {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSignaling {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                requests: Vec::new(),
                call_error: None,
                answer_error: None,
                frame_results: VecDeque::new(),
                events: Vec::new(),
                interval: Duration::from_millis(20),
            })),
        }
    }

    pub fn requests(&self) -> Vec<SignalingRequest> {
        self.script.lock().requests.clone()
    }

    /// Number of send attempts seen
    pub fn frames_sent(&self) -> usize {
        self.script
            .lock()
            .requests
            .iter()
            .filter(|r| matches!(r, SignalingRequest::Frame { .. }))
            .count()
    }

    pub fn fail_call(&self, error: SignalingError) {
        self.script.lock().call_error = Some(error);
    }

    pub fn fail_answer(&self, error: SignalingError) {
        self.script.lock().answer_error = Some(error);
    }

    /// Results for upcoming frame sends; `Ok` once exhausted
    pub fn push_frame_results(
        &self,
        results: impl IntoIterator<Item = Result<(), SendFrameError>>,
    ) {
        self.script.lock().frame_results.extend(results);
    }

    /// Event raised on the next `iterate`
    pub fn push_event(&self, event: SignalingEvent) {
        self.script.lock().events.push(event);
    }

    pub fn set_interval(&self, interval: Duration) {
        self.script.lock().interval = interval;
    }
}

impl CallSignaling for ScriptedSignaling {
    fn init(&mut self) -> Result<(), SignalingError> {
        Ok(())
    }

    fn iterate(&mut self, events: &mut Vec<SignalingEvent>) {
        events.append(&mut self.script.lock().events);
    }

    fn iteration_interval(&self) -> Duration {
        self.script.lock().interval
    }

    fn call(&mut self, friend: FriendNumber, _audio_bitrate: u32) -> Result<(), SignalingError> {
        let mut script = self.script.lock();
        script.requests.push(SignalingRequest::Call(friend));
        script.call_error.take().map_or(Ok(()), Err)
    }

    fn answer(&mut self, friend: FriendNumber, _audio_bitrate: u32) -> Result<(), SignalingError> {
        let mut script = self.script.lock();
        script.requests.push(SignalingRequest::Answer(friend));
        script.answer_error.take().map_or(Ok(()), Err)
    }

    fn control(
        &mut self,
        friend: FriendNumber,
        control: CallControl,
    ) -> Result<(), SignalingError> {
        self.script
            .lock()
            .requests
            .push(SignalingRequest::Control(friend, control));
        Ok(())
    }

    fn send_audio_frame(
        &mut self,
        friend: FriendNumber,
        pcm: &[i16],
        _sample_count: usize,
        _channels: u8,
        _sampling_rate: u32,
    ) -> Result<(), SendFrameError> {
        let mut script = self.script.lock();
        script.requests.push(SignalingRequest::Frame {
            friend,
            samples: pcm.len(),
        });
        script.frame_results.pop_front().unwrap_or(Ok(()))
    }

    fn send_end_cause(
        &mut self,
        friend: FriendNumber,
        cause: CallEnd,
    ) -> Result<(), SignalingError> {
        self.script
            .lock()
            .requests
            .push(SignalingRequest::EndCause(friend, cause));
        Ok(())
    }

    fn friend_key(&self, friend: FriendNumber) -> Option<String> {
        Some(format!("{:064X}", friend))
    }
}
