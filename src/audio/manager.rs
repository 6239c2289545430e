//! Audio device manager: device inventory and the three managed streams
//!
//! All hardware callbacks enter through [`AudioDeviceManager::handle`]. Two
//! independent locks guard the device lists and the stream slots; every
//! hardware stream call is made under the stream lock, so no callback can
//! observe a half torn down stream.

use crate::audio::{
    AudioHardware, ChannelVolumes, HardwareDevice, HardwareEvent, ManagedStream, NoiseFilter,
    NoiseFilterWorker, SampleSpec, SoundKind, SoundSource, StreamId, StreamKind, StreamPath,
    VoiceBuffers, VoiceFrameInfo, WorkerConfig, WriteOutcome,
};
use crate::call::CallCommand;
use crate::device::{
    AddOutcome, AudioDevInfo, CurrentDevicePolicy, DefaultDeviceStore, DeviceList, DeviceType,
    RemoveOutcome,
};
use crate::error::{PhoneError, Result};
use crate::message::{
    emit, AudioDevChange, AudioStreamInfo, AudioTest, DevChangeFlag, EventSink, Payload,
};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Repetitions per notification sound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundCycles {
    pub ring: u32,
    pub outgoing: u32,
    pub busy: u32,
    pub fail: u32,
}

impl SoundCycles {
    pub fn for_sound(&self, sound: SoundKind) -> u32 {
        match sound {
            SoundKind::Ring => self.ring,
            SoundKind::Outgoing => self.outgoing,
            SoundKind::Busy => self.busy,
            SoundKind::Fail | SoundKind::Error => self.fail,
            SoundKind::Test => 1,
        }
    }
}

impl Default for SoundCycles {
    fn default() -> Self {
        Self {
            ring: 30,
            outgoing: 30,
            busy: 3,
            fail: 2,
        }
    }
}

/// Manager tunables
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Local capture format
    pub sample_rate: u32,
    pub channels: u8,
    /// Frame duration used for capture and notification streams
    pub frame_latency_ms: u32,
    /// Capacity of the captured buffer in frames
    pub record_buffer_frames: usize,
    /// Capacity of the playback buffer in frames
    pub playback_buffer_frames: usize,
    pub sounds_dir: PathBuf,
    pub cycles: SoundCycles,
    pub worker: WorkerConfig,
}

impl ManagerConfig {
    /// Frame geometry of local capture
    pub fn local_frame(&self) -> VoiceFrameInfo {
        VoiceFrameInfo::from_latency_ms(self.frame_latency_ms, self.channels, self.sample_rate)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_latency_ms: 20,
            record_buffer_frames: 10,
            playback_buffer_frames: 8,
            sounds_dir: PathBuf::from("sounds"),
            cycles: SoundCycles::default(),
            worker: WorkerConfig::default(),
        }
    }
}

struct Devices {
    sinks: DeviceList,
    sources: DeviceList,
}

impl Devices {
    fn list(&self, kind: DeviceType) -> &DeviceList {
        match kind {
            DeviceType::Sink => &self.sinks,
            DeviceType::Source => &self.sources,
        }
    }

    fn list_mut(&mut self, kind: DeviceType) -> &mut DeviceList {
        match kind {
            DeviceType::Sink => &mut self.sinks,
            DeviceType::Source => &mut self.sources,
        }
    }
}

#[derive(Default)]
struct Streams {
    playback: Option<ManagedStream>,
    voice: Option<ManagedStream>,
    record: Option<ManagedStream>,
}

impl Streams {
    fn slot(&mut self, kind: StreamKind) -> &mut Option<ManagedStream> {
        match kind {
            StreamKind::Playback => &mut self.playback,
            StreamKind::Voice => &mut self.voice,
            StreamKind::Record => &mut self.record,
        }
    }

    fn find(&mut self, id: StreamId) -> Option<&mut Option<ManagedStream>> {
        [&mut self.playback, &mut self.voice, &mut self.record]
            .into_iter()
            .find(|slot| matches!(slot, Some(stream) if stream.id() == id))
    }
}

/// Owner of the device lists, managed streams and the noise filter worker
pub struct AudioDeviceManager {
    hardware: Arc<dyn AudioHardware>,
    devices: Mutex<Devices>,
    streams: Mutex<Streams>,
    buffers: VoiceBuffers,
    worker: NoiseFilterWorker,
    store: Arc<dyn DefaultDeviceStore>,
    policy: Box<dyn CurrentDevicePolicy>,
    events: EventSink,
    call_queue: Option<Sender<CallCommand>>,
    config: ManagerConfig,
}

impl AudioDeviceManager {
    pub fn new(
        hardware: Arc<dyn AudioHardware>,
        config: ManagerConfig,
        store: Arc<dyn DefaultDeviceStore>,
        policy: Box<dyn CurrentDevicePolicy>,
        filter: Box<dyn NoiseFilter>,
        events: EventSink,
    ) -> Self {
        let buffers = VoiceBuffers::new();
        let worker = NoiseFilterWorker::new(&buffers, filter, events.clone(), config.worker);
        Self {
            hardware,
            devices: Mutex::new(Devices {
                sinks: DeviceList::new(DeviceType::Sink),
                sources: DeviceList::new(DeviceType::Source),
            }),
            streams: Mutex::new(Streams::default()),
            buffers,
            worker,
            store,
            policy,
            events,
            call_queue: None,
            config,
        }
    }

    /// Queue receiving `PlaybackFinished` notifications
    pub fn with_call_queue(mut self, queue: Sender<CallCommand>) -> Self {
        self.call_queue = Some(queue);
        self
    }

    /// Subscribe to hardware events and load the initial device inventory
    pub fn init(self: &Arc<Self>) -> Result<()> {
        let manager = Arc::downgrade(self);
        self.hardware.subscribe(Arc::new(move |event| {
            if let Some(manager) = manager.upgrade() {
                manager.handle(event);
            }
        }));

        let devices = self.hardware.enumerate_devices()?;
        info!("Enumerated {} audio devices", devices.len());
        for device in devices {
            self.add_device(device);
        }
        Ok(())
    }

    pub fn buffers(&self) -> &VoiceBuffers {
        &self.buffers
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn worker(&self) -> &NoiseFilterWorker {
        &self.worker
    }

    /// Dispatch one hardware callback
    pub fn handle(&self, event: HardwareEvent) {
        match event {
            HardwareEvent::DeviceAdded(device) => self.add_device(device),
            HardwareEvent::DeviceRemoved { kind, index } => {
                if let Err(e) = self.remove_device(kind, index) {
                    error!("Device removal: {}", e);
                }
            }
            HardwareEvent::CardRemoved { card_index } => self.remove_card(card_index),
            HardwareEvent::DeviceVolumeChanged {
                kind,
                index,
                volume,
            } => self.device_volume_changed(kind, index, volume),
            HardwareEvent::StreamReady(id)
            | HardwareEvent::StreamChanged(id)
            | HardwareEvent::StreamOverflow(id)
            | HardwareEvent::StreamUnderflow(id)
            | HardwareEvent::StreamDrained(id)
            | HardwareEvent::StreamTerminated(id)
            | HardwareEvent::StreamWriteReady { stream: id, .. }
            | HardwareEvent::StreamReadReady { stream: id, .. }
            | HardwareEvent::StreamFailed { stream: id, .. } => self.handle_stream_event(id, event),
        }
    }

    // ---- devices ----

    pub fn add_device(&self, device: HardwareDevice) {
        let kind = device.kind;
        let index = device.index;
        let default_name = self.store.default_name(kind);

        let mut devices = self.devices.lock();
        let list = devices.list_mut(kind);
        let outcome = list.add(device.into(), default_name.as_deref(), self.policy.as_ref());

        match outcome {
            AddOutcome::Added { became_current } => {
                if let Some(added) = list.get(index) {
                    info!("Added {} {}", kind, added);
                }
                if became_current {
                    // flags of other entries may have changed
                    for device in list.iter() {
                        emit(&self.events, Payload::AudioDevInfo(device.clone()));
                    }
                } else if let Some(added) = list.get(index) {
                    emit(&self.events, Payload::AudioDevInfo(added.clone()));
                }
            }
            AddOutcome::Updated => {
                if let Some(updated) = list.get(index) {
                    emit(&self.events, Payload::AudioDevInfo(updated.clone()));
                }
            }
        }
    }

    /// Forget a device; an unknown index changes nothing
    pub fn remove_device(&self, kind: DeviceType, index: u32) -> Result<()> {
        let outcome = self
            .devices
            .lock()
            .list_mut(kind)
            .remove(index)
            .ok_or(PhoneError::DeviceNotFound { kind, index })?;
        self.announce_removal(outcome);
        Ok(())
    }

    pub fn remove_card(&self, card_index: u32) {
        let outcomes: Vec<RemoveOutcome> = {
            let mut devices = self.devices.lock();
            let mut outcomes = devices.sinks.remove_card(card_index);
            outcomes.extend(devices.sources.remove_card(card_index));
            outcomes
        };
        if outcomes.is_empty() {
            debug!("Card #{} had no known devices", card_index);
        }
        for outcome in outcomes {
            self.announce_removal(outcome);
        }
    }

    fn announce_removal(&self, outcome: RemoveOutcome) {
        let kind = outcome.removed.kind;
        info!("Removed {} {}", kind, outcome.removed);
        emit(
            &self.events,
            Payload::AudioDevChange(AudioDevChange {
                flag: DevChangeFlag::Remove,
                kind,
                device_index: outcome.removed.index,
                value: 0,
            }),
        );
        if let Some(replacement) = outcome.replacement {
            emit(
                &self.events,
                Payload::AudioDevChange(AudioDevChange {
                    flag: DevChangeFlag::Current,
                    kind,
                    device_index: replacement,
                    value: 1,
                }),
            );
        }
    }

    fn device_volume_changed(&self, kind: DeviceType, index: u32, volume: u32) {
        let mut devices = self.devices.lock();
        match devices.list_mut(kind).get_mut(index) {
            Some(device) => {
                if device.volume == volume {
                    return;
                }
                device.volume = volume;
                debug!("{} #{} volume {}", kind, index, volume);
                emit(
                    &self.events,
                    Payload::AudioDevChange(AudioDevChange {
                        flag: DevChangeFlag::Volume,
                        kind,
                        device_index: index,
                        value: volume,
                    }),
                );
            }
            None => trace!("Volume change for unknown {} #{}", kind, index),
        }
    }

    /// Apply a device change request
    pub fn apply_change(&self, change: AudioDevChange) -> Result<()> {
        let AudioDevChange {
            flag,
            kind,
            device_index: index,
            value,
        } = change;
        let not_found = PhoneError::DeviceNotFound { kind, index };

        match flag {
            DevChangeFlag::Volume => {
                let mut devices = self.devices.lock();
                let device = devices.list_mut(kind).get_mut(index).ok_or(not_found)?;
                self.hardware
                    .set_device_volume(kind, index, device.channels, value)?;
                device.volume = value;
                debug!("Set {} #{} volume to {}", kind, index, value);
            }
            DevChangeFlag::Current => {
                if !self.devices.lock().list_mut(kind).set_current(index) {
                    return Err(not_found);
                }
                info!("Current {} set to #{}", kind, index);
            }
            DevChangeFlag::Default => {
                let name = self
                    .devices
                    .lock()
                    .list_mut(kind)
                    .set_default(index)
                    .ok_or(not_found)?;
                self.store.set_default_name(kind, &name);
                info!("Default {} set to {}", kind, name);
            }
            DevChangeFlag::Remove => self.remove_device(kind, index)?,
        }
        Ok(())
    }

    /// Volume of every channel of a device
    pub fn volume(&self, kind: DeviceType, index: u32) -> Result<ChannelVolumes> {
        self.devices
            .lock()
            .list(kind)
            .get(index)
            .map(AudioDevInfo::channel_volumes)
            .ok_or(PhoneError::DeviceNotFound { kind, index })
    }

    pub fn devices(&self, kind: DeviceType) -> Vec<AudioDevInfo> {
        self.devices.lock().list(kind).iter().cloned().collect()
    }

    pub fn current_device(&self, kind: DeviceType) -> Option<AudioDevInfo> {
        self.devices.lock().list(kind).current().cloned()
    }

    /// Emit one `AudioDevInfo` event per known device
    pub fn publish_inventory(&self) {
        let devices = self.devices.lock();
        for device in devices.sinks.iter().chain(devices.sources.iter()) {
            emit(&self.events, Payload::AudioDevInfo(device.clone()));
        }
    }

    fn current_name(&self, kind: DeviceType) -> Option<String> {
        let name = self.devices.lock().list(kind).current().map(|d| d.name.clone());
        if name.is_none() {
            debug!("No current {}, using hardware default", kind);
        }
        name
    }

    // ---- streams ----

    /// Play a notification sound on the current sink, replacing any sound playing
    pub fn play(&self, sound: SoundKind) -> Result<()> {
        let cycles = self.config.cycles.for_sound(sound);
        let source = SoundSource::open(sound, &self.config.sounds_dir, cycles)?;
        let spec = source.spec();
        let fragment = spec.bytes_for_us(self.config.frame_latency_ms as u64 * 1000);
        let device = self.current_name(DeviceType::Sink);

        let mut streams = self.streams.lock();
        if let Some(previous) = streams.playback.take() {
            self.close_stream(previous, false);
        }
        let stream = ManagedStream::open(
            self.hardware.clone(),
            StreamKind::Playback,
            device.as_deref(),
            spec,
            fragment,
            StreamPath::Sound(source),
            None,
        )?;
        info!("Playing {} ({} cycles)", sound, cycles);
        streams.playback = Some(stream);
        Ok(())
    }

    pub fn stop_playback(&self) {
        let mut streams = self.streams.lock();
        if let Some(stream) = streams.playback.take() {
            debug!("Stopping {:?} playback", stream.sound());
            self.close_stream(stream, false);
        }
    }

    /// Sound currently playing
    pub fn playing(&self) -> Option<SoundKind> {
        self.streams
            .lock()
            .playback
            .as_ref()
            .and_then(ManagedStream::sound)
    }

    /// Publish `info` and start the voice stream fed by the playback buffer
    pub fn start_voice(&self, info: &VoiceFrameInfo) -> Result<()> {
        let device = self.current_name(DeviceType::Sink);

        let mut streams = self.streams.lock();
        if let Some(previous) = streams.voice.take() {
            self.close_stream(previous, false);
        }

        let stream = ManagedStream::open(
            self.hardware.clone(),
            StreamKind::Voice,
            device.as_deref(),
            SampleSpec {
                rate: info.sampling_rate,
                channels: info.channels,
            },
            info.buffer_size,
            StreamPath::Voice {
                source: self.buffers.playback.clone(),
            },
            Some(self.buffers.frame_info.clone()),
        )?;

        // callbacks wait on the stream lock, so nothing reads these early
        self.buffers.frame_info.set(*info);
        self.buffers
            .playback
            .init(self.config.playback_buffer_frames * info.buffer_size);
        info!("Voice stream started ({})", info);
        streams.voice = Some(stream);
        Ok(())
    }

    pub fn stop_voice(&self) {
        let mut streams = self.streams.lock();
        if let Some(stream) = streams.voice.take() {
            self.close_stream(stream, false);
        }
    }

    /// Start microphone capture and the noise filter worker
    pub fn start_record(&self, info: &VoiceFrameInfo) -> Result<()> {
        let device = self.current_name(DeviceType::Source);

        let mut streams = self.streams.lock();
        if let Some(previous) = streams.record.take() {
            self.close_stream(previous, false);
        }

        let stream = ManagedStream::open(
            self.hardware.clone(),
            StreamKind::Record,
            device.as_deref(),
            SampleSpec {
                rate: info.sampling_rate,
                channels: info.channels,
            },
            info.buffer_size,
            StreamPath::Record {
                sink: self.buffers.captured.clone(),
                signal: self.worker.signal(),
            },
            Some(self.buffers.frame_info.clone()),
        )?;

        self.buffers.frame_info.set(*info);
        self.buffers
            .captured
            .init(self.config.record_buffer_frames * info.buffer_size);
        streams.record = Some(stream);
        self.worker.start(info);
        info!("Record stream started ({})", info);
        Ok(())
    }

    pub fn stop_record(&self) {
        let mut streams = self.streams.lock();
        if let Some(stream) = streams.record.take() {
            self.close_stream(stream, false);
        }
    }

    /// Stop voice and capture paths together
    pub fn stop_call_audio(&self) {
        self.stop_voice();
        self.stop_record();
    }

    pub fn is_active(&self, kind: StreamKind) -> bool {
        self.streams.lock().slot(kind).is_some()
    }

    pub fn stream_info(&self, kind: StreamKind) -> Option<AudioStreamInfo> {
        self.streams.lock().slot(kind).as_ref().and_then(ManagedStream::info)
    }

    pub fn set_stream_volume(&self, kind: StreamKind, volume: u32) -> Result<()> {
        let mut streams = self.streams.lock();
        let stream = streams
            .slot(kind)
            .as_ref()
            .ok_or(PhoneError::StreamNotActive(kind))?;
        stream.set_volume(volume)?;
        debug!("{} stream volume {}", kind, volume);
        Ok(())
    }

    /// Start the requested audio test paths
    ///
    /// Record and playback together loop filtered capture back to the
    /// speaker through the voice stream.
    pub fn begin_test(&self, test: &AudioTest) -> Result<()> {
        let frame = self.config.local_frame();
        if test.record {
            self.worker.set_level_reports(true);
            self.start_record(&frame)?;
            if test.playback {
                self.start_voice(&frame)?;
            }
        } else if test.playback {
            self.play(SoundKind::Test)?;
        }
        info!(
            "Audio test started (playback: {}, record: {})",
            test.playback, test.record
        );
        Ok(())
    }

    pub fn end_test(&self) {
        self.stop_playback();
        self.stop_voice();
        self.stop_record();
        self.worker.set_level_reports(false);
        info!("Audio test stopped");
    }

    /// Tear down every stream
    pub fn shutdown(&self) {
        self.stop_playback();
        self.stop_call_audio();
    }

    fn handle_stream_event(&self, id: StreamId, event: HardwareEvent) {
        let mut streams = self.streams.lock();
        let Some(slot) = streams.find(id) else {
            trace!("Ignoring event for unknown stream {}: {:?}", id, event);
            return;
        };
        let Some(stream) = slot.as_mut() else {
            return;
        };

        let close = match event {
            HardwareEvent::StreamReady(_) => match stream.on_ready() {
                Ok(info) => {
                    emit(&self.events, Payload::AudioStreamInfo(info));
                    false
                }
                Err(e) => {
                    error!("{} stream {} metadata: {}", stream.kind(), id, e);
                    true
                }
            },
            HardwareEvent::StreamChanged(_) => match stream.on_changed() {
                Ok(info) => {
                    emit(&self.events, Payload::AudioStreamInfo(info));
                    false
                }
                Err(e) => {
                    warn!("{} stream {} metadata: {}", stream.kind(), id, e);
                    false
                }
            },
            HardwareEvent::StreamWriteReady { bytes, .. } => match stream.on_write_ready(bytes) {
                Ok(WriteOutcome::Draining) => {
                    debug!("Playback stream {} draining", id);
                    false
                }
                Ok(_) => false,
                Err(e) => {
                    error!("{} stream {} write: {}", stream.kind(), id, e);
                    true
                }
            },
            HardwareEvent::StreamReadReady { .. } => match stream.on_read_ready() {
                Ok(_) => false,
                Err(e) => {
                    error!("{} stream {} read: {}", stream.kind(), id, e);
                    true
                }
            },
            HardwareEvent::StreamOverflow(_) => {
                stream.on_overflow();
                false
            }
            HardwareEvent::StreamUnderflow(_) => {
                stream.on_underflow();
                false
            }
            HardwareEvent::StreamDrained(_) => stream.is_draining(),
            HardwareEvent::StreamTerminated(_) => {
                stream.on_terminated();
                true
            }
            HardwareEvent::StreamFailed { reason, .. } => {
                stream.on_failed(&reason);
                true
            }
            _ => false,
        };

        if close {
            if let Some(stream) = slot.take() {
                self.close_stream(stream, true);
            }
        }
    }

    /// Tear a stream down and publish its termination
    ///
    /// Called with the stream lock held.
    fn close_stream(&self, stream: ManagedStream, report_finish: bool) {
        let kind = stream.kind();
        let sound = stream.sound();
        let terminated = stream.info().map(|_| stream.terminated_info());

        if kind == StreamKind::Record {
            self.worker.stop();
        }
        drop(stream);

        if let Some(info) = terminated {
            emit(&self.events, Payload::AudioStreamInfo(info));
        }

        if report_finish {
            if let Some(sound) = sound {
                info!("Playback of {} finished", sound);
                emit(&self.events, Payload::PlaybackFinish(sound));
                if let Some(queue) = &self.call_queue {
                    if queue.send(CallCommand::PlaybackFinished(sound)).is_err() {
                        trace!("Call queue closed");
                    }
                }
            }
        }
    }
}

impl Drop for AudioDeviceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{write_tone, Bypass, HardwareError, StreamInfoState};
    use crate::device::{MemoryStore, NoPreference};
    use crate::message::Message;
    use crate::testing::{hw_device, HardwareCall, MockHardware};
    use crossbeam_channel::{unbounded, Receiver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        hw: Arc<MockHardware>,
        manager: Arc<AudioDeviceManager>,
        events: Receiver<Message>,
        calls: Receiver<CallCommand>,
        store: Arc<MemoryStore>,
    }

    fn fixture(devices: Vec<HardwareDevice>, store: MemoryStore) -> Fixture {
        let hw = Arc::new(MockHardware::with_devices(devices));
        let store = Arc::new(store);
        let (tx, events) = unbounded();
        let (call_tx, calls) = unbounded();

        static FIXTURES: AtomicUsize = AtomicUsize::new(0);
        let sounds_dir = std::env::temp_dir().join(format!(
            "deskphone-manager-{}-{}",
            std::process::id(),
            FIXTURES.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&sounds_dir).unwrap();
        let spec = SampleSpec {
            rate: 8000,
            channels: 1,
        };
        write_tone(&sounds_dir.join("ring.wav"), spec, 440.0, 10).unwrap();
        write_tone(&sounds_dir.join("test.wav"), spec, 440.0, 10).unwrap();

        let config = ManagerConfig {
            sounds_dir,
            cycles: SoundCycles {
                ring: 2,
                ..SoundCycles::default()
            },
            ..ManagerConfig::default()
        };
        let manager = Arc::new(
            AudioDeviceManager::new(
                hw.clone(),
                config,
                store.clone(),
                Box::new(NoPreference),
                Box::new(Bypass),
                tx,
            )
            .with_call_queue(call_tx),
        );
        manager.init().unwrap();

        Fixture {
            hw,
            manager,
            events,
            calls,
            store,
        }
    }

    fn three_sinks() -> Vec<HardwareDevice> {
        vec![
            hw_device(DeviceType::Sink, 0, 1, "sink-one"),
            hw_device(DeviceType::Sink, 0, 2, "sink-two"),
            hw_device(DeviceType::Sink, 1, 3, "sink-three"),
            hw_device(DeviceType::Source, 0, 10, "mic"),
        ]
    }

    fn drain_events(rx: &Receiver<Message>) -> Vec<Payload> {
        rx.try_iter().map(|m| m.payload).collect()
    }

    fn flags(manager: &AudioDeviceManager) -> Vec<(u32, bool, bool)> {
        manager
            .devices(DeviceType::Sink)
            .iter()
            .map(|d| (d.index, d.is_current, d.is_default))
            .collect()
    }

    #[test]
    fn test_default_device_selection() {
        let f = fixture(three_sinks(), MemoryStore::with_defaults("usb-headset", ""));
        assert_eq!(
            flags(&f.manager),
            vec![(1, true, false), (2, false, false), (3, false, false)]
        );

        f.manager.handle(HardwareEvent::DeviceAdded(hw_device(
            DeviceType::Sink,
            2,
            4,
            "usb-headset",
        )));
        assert_eq!(
            flags(&f.manager),
            vec![
                (1, false, false),
                (2, false, false),
                (3, false, false),
                (4, true, true)
            ]
        );
    }

    #[test]
    fn test_volume_round_trip() {
        let f = fixture(three_sinks(), MemoryStore::new());
        f.manager
            .apply_change(AudioDevChange {
                flag: DevChangeFlag::Volume,
                kind: DeviceType::Sink,
                device_index: 2,
                value: 42,
            })
            .unwrap();

        let volumes = f.manager.volume(DeviceType::Sink, 2).unwrap();
        assert_eq!(volumes.values(), &[42, 42]);
        assert!(f.hw.calls().contains(&HardwareCall::SetDeviceVolume {
            kind: DeviceType::Sink,
            index: 2,
            channels: 2,
            volume: 42,
        }));
    }

    #[test]
    fn test_unknown_device_is_noop() {
        let f = fixture(three_sinks(), MemoryStore::new());
        let before = flags(&f.manager);

        let err = f
            .manager
            .apply_change(AudioDevChange {
                flag: DevChangeFlag::Current,
                kind: DeviceType::Sink,
                device_index: 99,
                value: 1,
            })
            .unwrap_err();
        assert!(matches!(err, PhoneError::DeviceNotFound { index: 99, .. }));
        assert!(f.manager.volume(DeviceType::Sink, 99).is_err());
        assert_eq!(flags(&f.manager), before);
    }

    #[test]
    fn test_set_default_persists_name() {
        let f = fixture(three_sinks(), MemoryStore::new());
        f.manager
            .apply_change(AudioDevChange {
                flag: DevChangeFlag::Default,
                kind: DeviceType::Sink,
                device_index: 3,
                value: 1,
            })
            .unwrap();
        assert_eq!(
            f.store.default_name(DeviceType::Sink).as_deref(),
            Some("sink-three")
        );
        assert_eq!(f.manager.current_device(DeviceType::Sink).unwrap().index, 3);
    }

    #[test]
    fn test_remove_current_announces_replacement() {
        let f = fixture(three_sinks(), MemoryStore::new());
        drain_events(&f.events);

        f.manager.handle(HardwareEvent::DeviceRemoved {
            kind: DeviceType::Sink,
            index: 1,
        });

        let events = drain_events(&f.events);
        assert!(events.contains(&Payload::AudioDevChange(AudioDevChange {
            flag: DevChangeFlag::Current,
            kind: DeviceType::Sink,
            device_index: 2,
            value: 1,
        })));
        assert_eq!(f.manager.current_device(DeviceType::Sink).unwrap().index, 2);
    }

    #[test]
    fn test_card_removal() {
        let f = fixture(three_sinks(), MemoryStore::new());
        f.manager.handle(HardwareEvent::CardRemoved { card_index: 0 });
        assert_eq!(f.manager.devices(DeviceType::Sink).len(), 1);
        assert!(f.manager.devices(DeviceType::Source).is_empty());
        assert_eq!(f.manager.current_device(DeviceType::Sink).unwrap().index, 3);
    }

    #[test]
    fn test_playback_lifecycle() {
        let f = fixture(three_sinks(), MemoryStore::new());
        f.manager.play(SoundKind::Ring).unwrap();
        assert_eq!(f.manager.playing(), Some(SoundKind::Ring));

        let id = f.hw.last_stream(StreamKind::Playback).unwrap();
        assert!(f.hw.calls().contains(&HardwareCall::Open {
            kind: StreamKind::Playback,
            device: Some("sink-one".to_string()),
        }));

        f.manager.handle(HardwareEvent::StreamReady(id));
        // 80 samples per cycle, two cycles
        f.manager.handle(HardwareEvent::StreamWriteReady {
            stream: id,
            bytes: 100,
        });
        f.manager.handle(HardwareEvent::StreamWriteReady {
            stream: id,
            bytes: 1000,
        });
        assert_eq!(f.hw.written(id).len(), 320);
        assert!(f.hw.calls().contains(&HardwareCall::Drain(id)));

        f.manager.handle(HardwareEvent::StreamDrained(id));
        assert_eq!(f.manager.playing(), None);
        assert!(f.hw.calls().contains(&HardwareCall::Disconnect(id)));

        let events = drain_events(&f.events);
        assert!(events.contains(&Payload::PlaybackFinish(SoundKind::Ring)));
        assert!(events.iter().any(|p| matches!(
            p,
            Payload::AudioStreamInfo(AudioStreamInfo {
                state: StreamInfoState::Terminated,
                kind: StreamKind::Playback,
                ..
            })
        )));
        assert_eq!(
            f.calls.try_recv().unwrap(),
            CallCommand::PlaybackFinished(SoundKind::Ring)
        );
    }

    #[test]
    fn test_stop_playback_is_silent() {
        let f = fixture(three_sinks(), MemoryStore::new());
        f.manager.play(SoundKind::Ring).unwrap();
        f.manager.stop_playback();
        assert!(f.calls.try_recv().is_err());
        assert!(!drain_events(&f.events)
            .iter()
            .any(|p| matches!(p, Payload::PlaybackFinish(_))));
    }

    #[test]
    fn test_missing_sound_file() {
        let f = fixture(three_sinks(), MemoryStore::new());
        let err = f.manager.play(SoundKind::Busy).unwrap_err();
        assert!(matches!(err, PhoneError::Sound { .. }));
        assert_eq!(f.manager.playing(), None);
    }

    #[test]
    fn test_voice_stream_teardown() {
        let f = fixture(three_sinks(), MemoryStore::new());
        let info = VoiceFrameInfo::from_latency_ms(20, 1, 48000);
        f.manager.start_voice(&info).unwrap();

        let buffers = f.manager.buffers().clone();
        assert_eq!(buffers.frame_info.snapshot(), Some(info));
        assert_eq!(buffers.playback.capacity(), 8 * info.buffer_size);
        assert!(buffers.playback.write(&vec![1u8; info.buffer_size]));

        let id = f.hw.last_stream(StreamKind::Voice).unwrap();
        f.manager.stop_voice();

        assert!(f.hw.calls().contains(&HardwareCall::Disconnect(id)));
        assert_eq!(buffers.playback.available(), 0);
        assert!(!buffers.frame_info.is_set());
        assert!(!f.manager.is_active(StreamKind::Voice));
    }

    #[test]
    fn test_failed_voice_open_leaves_no_state() {
        let f = fixture(three_sinks(), MemoryStore::new());
        let buffers = f.manager.buffers().clone();
        let first = VoiceFrameInfo::from_latency_ms(20, 1, 48000);
        f.manager.start_voice(&first).unwrap();
        assert!(buffers.playback.write(&vec![1u8; first.buffer_size]));
        f.manager.stop_voice();

        f.hw.fail_open(StreamKind::Voice);
        let second = VoiceFrameInfo::from_latency_ms(10, 1, 48000);
        let err = f.manager.start_voice(&second).unwrap_err();
        assert!(matches!(err, PhoneError::Hardware(HardwareError::Connect { .. })));

        assert!(!f.manager.is_active(StreamKind::Voice));
        assert!(!buffers.frame_info.is_set());
        assert_eq!(buffers.playback.available(), 0);
        // not resized for the stream that never opened
        assert_eq!(buffers.playback.capacity(), 8 * first.buffer_size);
    }

    #[test]
    fn test_failed_record_open_leaves_no_state() {
        let f = fixture(three_sinks(), MemoryStore::new());
        f.hw.fail_open(StreamKind::Record);
        let info = f.manager.config().local_frame();

        assert!(f.manager.start_record(&info).is_err());
        assert!(!f.manager.is_active(StreamKind::Record));
        assert!(!f.manager.worker().is_running());
        assert!(!f.manager.buffers().frame_info.is_set());
        assert_eq!(f.manager.buffers().captured.capacity(), 0);
    }

    #[test]
    fn test_record_failure_stops_worker() {
        let f = fixture(three_sinks(), MemoryStore::new());
        let info = f.manager.config().local_frame();
        f.manager.start_record(&info).unwrap();
        assert!(f.manager.worker().is_running());

        let id = f.hw.last_stream(StreamKind::Record).unwrap();
        f.manager.handle(HardwareEvent::StreamReady(id));
        f.manager.handle(HardwareEvent::StreamFailed {
            stream: id,
            reason: "device unplugged".to_string(),
        });

        assert!(!f.manager.is_active(StreamKind::Record));
        assert!(!f.manager.worker().is_running());
        // failed streams are not disconnected again
        assert!(!f.hw.calls().contains(&HardwareCall::Disconnect(id)));
    }

    #[test]
    fn test_stream_volume() {
        let f = fixture(three_sinks(), MemoryStore::new());
        assert!(matches!(
            f.manager.set_stream_volume(StreamKind::Voice, 10),
            Err(PhoneError::StreamNotActive(StreamKind::Voice))
        ));

        let info = f.manager.config().local_frame();
        f.manager.start_voice(&info).unwrap();
        let id = f.hw.last_stream(StreamKind::Voice).unwrap();
        f.manager.set_stream_volume(StreamKind::Voice, 10).unwrap();
        assert!(f.hw.calls().contains(&HardwareCall::SetStreamVolume {
            stream: id,
            volume: 10
        }));
    }

    #[test]
    fn test_unknown_stream_events_ignored() {
        let f = fixture(three_sinks(), MemoryStore::new());
        drain_events(&f.events);
        f.manager.handle(HardwareEvent::StreamReady(999));
        f.manager.handle(HardwareEvent::StreamDrained(999));
        assert!(drain_events(&f.events).is_empty());
    }

    #[test]
    fn test_events_through_subscription() {
        let f = fixture(three_sinks(), MemoryStore::new());
        f.hw.deliver(HardwareEvent::DeviceVolumeChanged {
            kind: DeviceType::Source,
            index: 10,
            volume: 7,
        });
        assert_eq!(f.manager.volume(DeviceType::Source, 10).unwrap().average(), 7);
    }
}
