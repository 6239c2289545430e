//! Process-wide context owning the audio manager and the call thread

use crate::audio::{AudioDeviceManager, AudioHardware};
use crate::call::{CallCommand, CallService, CallSignaling, CallStateMachine, TelephoneAdapter};
use crate::config::PhoneConfig;
use crate::error::Result;
use crate::message::{send, Message, MessageKind, Payload};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The single call state machine, audio device manager and noise filter
/// worker of the process, wired together
pub struct PhoneContext {
    audio: Arc<AudioDeviceManager>,
    call: CallService,
    events: Sender<Message>,
    stopped: bool,
}

impl PhoneContext {
    /// Build and start every component
    ///
    /// Returns the context and the queue receiving answers and events.
    /// Hardware or signaling initialization failures abort startup.
    pub fn start(
        config: &PhoneConfig,
        hardware: Arc<dyn AudioHardware>,
        signaling: Box<dyn CallSignaling>,
        adapter: Box<dyn TelephoneAdapter>,
    ) -> Result<(Self, Receiver<Message>)> {
        let (events, receiver) = unbounded();
        let (call_tx, call_rx) = CallService::queue();

        let audio = Arc::new(
            AudioDeviceManager::new(
                hardware,
                config.manager_config(),
                Arc::new(config.device_store()),
                config.device_policy(),
                config.noise_filter(),
                events.clone(),
            )
            .with_call_queue(call_tx.clone()),
        );
        audio.init()?;

        let mut machine = CallStateMachine::new(
            signaling,
            adapter,
            audio.clone(),
            events.clone(),
            config.call_config(),
        );
        machine.init()?;

        let call = CallService::start(machine, call_tx, call_rx);
        info!("Phone started");

        Ok((
            Self {
                audio,
                call,
                events,
                stopped: false,
            },
            receiver,
        ))
    }

    pub fn audio(&self) -> &Arc<AudioDeviceManager> {
        &self.audio
    }

    /// Route an inbound message to the component that owns it
    ///
    /// Call-related commands are queued to the call thread, which answers
    /// them; device and stream commands are executed and answered here.
    pub fn dispatch(&self, message: Message) -> Result<()> {
        let id = message.id;
        if let Payload::Handset(event) = message.payload {
            return self.call.send(CallCommand::Handset(event));
        }
        if message.kind != MessageKind::Command {
            debug!("Ignoring inbound {:?} message", message.kind);
            return Ok(());
        }

        match message.payload {
            Payload::CallAction(action) => self.call.send(CallCommand::Action { id, action }),
            Payload::AudioTest(test) => self.call.send(CallCommand::AudioTest { id, test }),
            Payload::CallStateRequest => self.call.send(CallCommand::StateQuery { id }),
            Payload::AudioDevChange(change) => {
                self.answer(id, self.audio.apply_change(change));
                Ok(())
            }
            Payload::AudioDevInfoRequest => {
                self.audio.publish_inventory();
                self.answer(id, Ok(()));
                Ok(())
            }
            Payload::AudioStreamInfo(info) => {
                self.answer(id, self.audio.set_stream_volume(info.kind, info.volume));
                Ok(())
            }
            other => {
                warn!("Unsupported command {:?}", other);
                Ok(())
            }
        }
    }

    fn answer(&self, id: u64, result: Result<()>) {
        match result {
            Ok(()) => send(&self.events, Message::ok(id)),
            Err(e) => {
                if e.is_recoverable() {
                    warn!("Command {} failed: {}", id, e);
                } else {
                    error!("Command {} failed: {}", id, e);
                }
                send(&self.events, Message::error(id, &e));
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.call.is_running()
    }

    /// End any call, stop the call thread and close every stream
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.call.stop();
        self.audio.shutdown();
        info!("Phone stopped");
    }
}

impl Drop for PhoneContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{write_tone, SampleSpec, SoundKind, StreamInfoState, StreamKind};
    use crate::call::{CallEnd, CallStatus, NoAdapter};
    use crate::device::DeviceType;
    use crate::message::{AudioDevChange, CallAction, CallActionKind, DevChangeFlag};
    use crate::sim::{EchoSignaling, SimHardware};
    use crate::testing::{hw_device, MockHardware, ScriptedSignaling};
    use std::time::{Duration, Instant};

    fn wait_for(rx: &Receiver<Message>, pred: impl Fn(&Message) -> bool) -> Option<Message> {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Ok(message) = rx.recv_timeout(Duration::from_millis(50)) {
                if pred(&message) {
                    return Some(message);
                }
            }
        }
        None
    }

    fn answer_to(id: u64) -> impl Fn(&Message) -> bool {
        move |m| m.kind == MessageKind::Answer && m.id == id
    }

    fn mock_context() -> (PhoneContext, Receiver<Message>) {
        let hw = Arc::new(MockHardware::with_devices(vec![
            hw_device(DeviceType::Sink, 0, 1, "speaker"),
            hw_device(DeviceType::Source, 0, 2, "mic"),
        ]));
        PhoneContext::start(
            &PhoneConfig::default(),
            hw,
            Box::new(ScriptedSignaling::new()),
            Box::new(NoAdapter),
        )
        .unwrap()
    }

    #[test]
    fn test_inventory_request() {
        let (ctx, rx) = mock_context();
        // startup announcements
        while rx.try_recv().is_ok() {}

        ctx.dispatch(Message::command(4, Payload::AudioDevInfoRequest))
            .unwrap();

        // inventory events precede the answer
        let messages: Vec<Message> = rx.try_iter().collect();
        let names: Vec<&str> = messages
            .iter()
            .filter_map(|m| match &m.payload {
                Payload::AudioDevInfo(info) => Some(info.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["speaker", "mic"]);
        assert_eq!(messages.last().map(|m| &m.payload), Some(&Payload::Ok));
    }

    #[test]
    fn test_device_change_unknown_index_answers_error() {
        let (ctx, rx) = mock_context();
        ctx.dispatch(Message::command(
            5,
            Payload::AudioDevChange(AudioDevChange {
                flag: DevChangeFlag::Volume,
                kind: DeviceType::Sink,
                device_index: 99,
                value: 10,
            }),
        ))
        .unwrap();

        match wait_for(&rx, answer_to(5)).unwrap().payload {
            Payload::Error(info) => assert_eq!(info.code, 3),
            other => panic!("unexpected answer {:?}", other),
        }
    }

    #[test]
    fn test_call_state_request_routed() {
        let (mut ctx, rx) = mock_context();
        ctx.dispatch(Message::command(6, Payload::CallStateRequest))
            .unwrap();
        let answer = wait_for(&rx, answer_to(6)).unwrap();
        assert!(matches!(answer.payload, Payload::CallState(ref s) if s.is_idle()));

        ctx.shutdown();
        assert!(!ctx.is_running());
    }

    #[test]
    fn test_stream_volume_without_stream() {
        let (ctx, rx) = mock_context();
        ctx.dispatch(Message::command(
            7,
            Payload::AudioStreamInfo(crate::message::AudioStreamInfo {
                kind: StreamKind::Voice,
                state: StreamInfoState::Changed,
                device_index: 1,
                volume: 1000,
                volume_steps: 65537,
                channels: 1,
                has_volume: true,
                volume_writable: true,
            }),
        ))
        .unwrap();
        match wait_for(&rx, answer_to(7)).unwrap().payload {
            Payload::Error(info) => assert_eq!(info.code, 7),
            other => panic!("unexpected answer {:?}", other),
        }
    }

    #[test]
    fn test_echo_call_end_to_end() {
        let sounds_dir =
            std::env::temp_dir().join(format!("deskphone-e2e-{}", std::process::id()));
        std::fs::create_dir_all(&sounds_dir).unwrap();
        let spec = SampleSpec {
            rate: 8000,
            channels: 1,
        };
        for sound in [SoundKind::Outgoing, SoundKind::Busy, SoundKind::Fail] {
            write_tone(&sounds_dir.join(sound.file_name()), spec, 440.0, 20).unwrap();
        }

        let mut config = PhoneConfig::default();
        config.audio.sounds_dir = sounds_dir;
        config.call.warmup_frames = 2;

        let (mut ctx, rx) = PhoneContext::start(
            &config,
            Arc::new(SimHardware::new()),
            Box::new(EchoSignaling::new(1).with_ring_iterations(2)),
            Box::new(NoAdapter),
        )
        .unwrap();

        ctx.dispatch(Message::command(
            1,
            Payload::CallAction(CallAction {
                action: CallActionKind::Call,
                peer: 1,
            }),
        ))
        .unwrap();

        assert!(wait_for(&rx, |m| {
            matches!(m.payload, Payload::CallState(ref s) if s.status == CallStatus::InProgress)
        })
        .is_some());
        assert!(wait_for(&rx, |m| {
            matches!(
                m.payload,
                Payload::AudioStreamInfo(ref i)
                    if i.kind == StreamKind::Voice && i.state == StreamInfoState::Created
            )
        })
        .is_some());

        ctx.dispatch(Message::command(
            2,
            Payload::CallAction(CallAction {
                action: CallActionKind::End,
                peer: 1,
            }),
        ))
        .unwrap();
        assert!(wait_for(&rx, |m| {
            matches!(m.payload, Payload::CallState(ref s) if s.end == CallEnd::SelfEnd)
        })
        .is_some());
        assert!(!ctx.audio().is_active(StreamKind::Voice));

        ctx.shutdown();
    }
}
