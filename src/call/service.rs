//! Call thread running the cooperative loop

use crate::call::{CallCommand, CallStateMachine};
use crate::error::{PhoneError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Handle to the running call loop
pub struct CallService {
    commands: Sender<CallCommand>,
    handle: Option<JoinHandle<()>>,
}

impl CallService {
    /// Create the command queue used to reach the call thread
    pub fn queue() -> (Sender<CallCommand>, Receiver<CallCommand>) {
        unbounded()
    }

    /// Start the loop for `machine`, reading requests from `commands`
    pub fn start(
        machine: CallStateMachine,
        sender: Sender<CallCommand>,
        commands: Receiver<CallCommand>,
    ) -> Self {
        let handle = thread::spawn(move || call_loop(machine, commands));
        info!("Call service started");
        Self {
            commands: sender,
            handle: Some(handle),
        }
    }

    /// Queue a request for the call thread
    pub fn send(&self, command: CallCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|e| PhoneError::ChannelError(e.to_string()))
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// End any call and join the thread
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.commands.send(CallCommand::Shutdown);
        if handle.join().is_err() {
            warn!("Call thread panicked");
        }
        info!("Call service stopped");
    }
}

impl Drop for CallService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Iterate, drain queued commands within the interval, then wait for the rest
fn call_loop(mut machine: CallStateMachine, commands: Receiver<CallCommand>) {
    debug!("Call loop running");

    loop {
        let start = Instant::now();
        machine.iterate(start);
        let deadline = start + machine.next_interval();

        let mut over_budget = false;
        loop {
            match commands.try_recv() {
                Ok(CallCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                    machine.shutdown();
                    return;
                }
                Ok(command) => machine.handle_command(command),
                Err(TryRecvError::Empty) => break,
            }
            if Instant::now() >= deadline {
                over_budget = true;
                break;
            }
        }
        if over_budget {
            // remaining commands go first on the next pass
            continue;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match commands.recv_timeout(remaining) {
            Ok(CallCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                machine.shutdown();
                return;
            }
            Ok(command) => machine.handle_command(command),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioDeviceManager, Bypass, ManagerConfig};
    use crate::call::{CallConfig, NoAdapter, PeerState, SignalingEvent};
    use crate::device::{MemoryStore, NoPreference};
    use crate::message::{CallAction, CallActionKind, Message, MessageKind, Payload};
    use crate::testing::{MockHardware, ScriptedSignaling};
    use std::sync::Arc;
    use std::time::Duration;

    fn start() -> (CallService, ScriptedSignaling, Receiver<Message>) {
        let (tx, events) = unbounded();
        let audio = Arc::new(AudioDeviceManager::new(
            Arc::new(MockHardware::new()),
            ManagerConfig::default(),
            Arc::new(MemoryStore::new()),
            Box::new(NoPreference),
            Box::new(Bypass),
            tx.clone(),
        ));
        let signaling = ScriptedSignaling::new();
        signaling.set_interval(Duration::from_millis(5));
        let machine = CallStateMachine::new(
            Box::new(signaling.clone()),
            Box::new(NoAdapter),
            audio,
            tx,
            CallConfig::default(),
        );
        let (sender, receiver) = CallService::queue();
        (
            CallService::start(machine, sender, receiver),
            signaling,
            events,
        )
    }

    fn next_answer(events: &Receiver<Message>, id: u64) -> Payload {
        loop {
            let message = events.recv_timeout(Duration::from_secs(2)).unwrap();
            if message.kind == MessageKind::Answer && message.id == id {
                return message.payload;
            }
        }
    }

    #[test]
    fn test_state_query_answered() {
        let (mut service, _signaling, events) = start();
        service.send(CallCommand::StateQuery { id: 11 }).unwrap();

        match next_answer(&events, 11) {
            Payload::CallState(state) => assert!(state.is_idle()),
            other => panic!("unexpected answer {:?}", other),
        }
        service.stop();
        assert!(!service.is_running());
    }

    #[test]
    fn test_signals_processed_by_loop() {
        let (mut service, signaling, events) = start();
        service
            .send(CallCommand::Action {
                id: 2,
                action: CallAction {
                    action: CallActionKind::Call,
                    peer: 7,
                },
            })
            .unwrap();
        assert_eq!(next_answer(&events, 2), Payload::Ok);

        signaling.push_event(SignalingEvent::StateChanged {
            friend: 7,
            state: PeerState::Active {
                sending: true,
                accepting: true,
            },
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut in_progress = false;
        while Instant::now() < deadline && !in_progress {
            if let Ok(message) = events.recv_timeout(Duration::from_millis(100)) {
                if let Payload::CallState(state) = message.payload {
                    in_progress = state.status == crate::call::CallStatus::InProgress;
                }
            }
        }
        assert!(in_progress);

        // shutdown ends the call
        service.stop();
        let ended = events.try_iter().any(|m| {
            matches!(m.payload, Payload::CallState(ref s) if s.end == crate::call::CallEnd::SelfEnd)
        });
        assert!(ended);
    }
}
