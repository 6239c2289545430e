//! Simulated call network with a single peer that echoes audio back

use crate::call::{
    CallControl, CallEnd, CallSignaling, FriendNumber, PeerState, SendFrameError, SignalingError,
    SignalingEvent,
};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::time::Duration;
use tracing::{debug, info};

const ITERATION_INTERVAL: Duration = Duration::from_millis(20);

/// Frames held for echoing before the oldest is dropped
const ECHO_QUEUE_FRAMES: usize = 50;

/// Peer audio format while it has nothing to echo
const PEER_RATE: u32 = 48000;
const PEER_FRAME_SAMPLES: usize = 960;
const PEER_TONE_HZ: f32 = 660.0;

struct EchoCall {
    friend: FriendNumber,
    answered: bool,
    ring_left: u32,
    frames_sent: u64,
}

struct EchoFrame {
    pcm: Vec<i16>,
    sample_count: usize,
    channels: u8,
    sampling_rate: u32,
}

/// Peer that answers after a few iterations and sends back every frame it
/// receives, talking a tone until the first frame arrives
pub struct EchoSignaling {
    peer: FriendNumber,
    ring_iterations: u32,
    hang_up_after: Option<u64>,
    incoming: bool,
    call: Option<EchoCall>,
    echo: VecDeque<EchoFrame>,
    phase: f32,
}

impl EchoSignaling {
    pub fn new(peer: FriendNumber) -> Self {
        Self {
            peer,
            ring_iterations: 3,
            hang_up_after: None,
            incoming: false,
            call: None,
            echo: VecDeque::new(),
            phase: 0.0,
        }
    }

    /// Iterations the peer lets an outgoing call ring before answering
    pub fn with_ring_iterations(mut self, iterations: u32) -> Self {
        self.ring_iterations = iterations;
        self
    }

    /// Peer hangs up after sending this many frames
    pub fn with_hang_up_after(mut self, frames: u64) -> Self {
        self.hang_up_after = Some(frames);
        self
    }

    /// Peer calls in on the first iteration
    pub fn with_incoming_call(mut self) -> Self {
        self.incoming = true;
        self
    }

    pub fn peer(&self) -> FriendNumber {
        self.peer
    }

    fn tone_frame(&mut self) -> EchoFrame {
        let advance = 2.0 * PI * PEER_TONE_HZ / PEER_RATE as f32;
        let pcm = (0..PEER_FRAME_SAMPLES)
            .map(|_| {
                let sample = (self.phase.sin() * 2000.0) as i16;
                self.phase = (self.phase + advance) % (2.0 * PI);
                sample
            })
            .collect();
        EchoFrame {
            pcm,
            sample_count: PEER_FRAME_SAMPLES,
            channels: 1,
            sampling_rate: PEER_RATE,
        }
    }

    fn end_call(&mut self) {
        self.call = None;
        self.echo.clear();
    }
}

impl CallSignaling for EchoSignaling {
    fn init(&mut self) -> Result<(), SignalingError> {
        info!("Echo peer {} online", self.peer);
        Ok(())
    }

    fn iterate(&mut self, events: &mut Vec<SignalingEvent>) {
        if self.incoming && self.call.is_none() {
            self.incoming = false;
            self.call = Some(EchoCall {
                friend: self.peer,
                answered: false,
                ring_left: 0,
                frames_sent: 0,
            });
            events.push(SignalingEvent::IncomingCall { friend: self.peer });
            return;
        }

        let Some(call) = self.call.as_mut() else {
            return;
        };
        let friend = call.friend;

        if !call.answered {
            if call.ring_left == 0 {
                // incoming calls wait for `answer`
                return;
            }
            call.ring_left -= 1;
            if call.ring_left == 0 {
                call.answered = true;
                debug!("Echo peer answered");
                events.push(SignalingEvent::StateChanged {
                    friend,
                    state: PeerState::Active {
                        sending: true,
                        accepting: true,
                    },
                });
            }
            return;
        }

        if self
            .hang_up_after
            .is_some_and(|limit| call.frames_sent >= limit)
        {
            info!("Echo peer hangs up");
            events.push(SignalingEvent::StateChanged {
                friend,
                state: PeerState::Finished,
            });
            events.push(SignalingEvent::EndCause {
                friend,
                cause: CallEnd::FriendEnd,
            });
            self.end_call();
            return;
        }

        call.frames_sent += 1;
        let frame = match self.echo.pop_front() {
            Some(frame) => frame,
            None => self.tone_frame(),
        };
        events.push(SignalingEvent::AudioFrame {
            friend,
            pcm: frame.pcm,
            sample_count: frame.sample_count,
            channels: frame.channels,
            sampling_rate: frame.sampling_rate,
        });
    }

    fn iteration_interval(&self) -> Duration {
        ITERATION_INTERVAL
    }

    fn call(&mut self, friend: FriendNumber, audio_bitrate: u32) -> Result<(), SignalingError> {
        if friend != self.peer {
            return Err(SignalingError::FriendNotConnected(friend));
        }
        if self.call.is_some() {
            return Err(SignalingError::AlreadyInCall(friend));
        }
        if audio_bitrate == 0 {
            return Err(SignalingError::InvalidBitrate(audio_bitrate));
        }
        self.call = Some(EchoCall {
            friend,
            answered: false,
            ring_left: self.ring_iterations.max(1),
            frames_sent: 0,
        });
        Ok(())
    }

    fn answer(&mut self, friend: FriendNumber, _audio_bitrate: u32) -> Result<(), SignalingError> {
        match self.call.as_mut() {
            Some(call) if call.friend == friend && !call.answered => {
                call.answered = true;
                Ok(())
            }
            _ => Err(SignalingError::FriendNotFound(friend)),
        }
    }

    fn control(
        &mut self,
        friend: FriendNumber,
        control: CallControl,
    ) -> Result<(), SignalingError> {
        match control {
            CallControl::Cancel => {
                if self.call.as_ref().map(|c| c.friend) == Some(friend) {
                    debug!("Echo call with {} cancelled", friend);
                    self.end_call();
                }
                Ok(())
            }
            CallControl::MuteAudio | CallControl::UnmuteAudio => Ok(()),
        }
    }

    fn send_audio_frame(
        &mut self,
        friend: FriendNumber,
        pcm: &[i16],
        sample_count: usize,
        channels: u8,
        sampling_rate: u32,
    ) -> Result<(), SendFrameError> {
        match &self.call {
            Some(call) if call.friend == friend && call.answered => {}
            _ => return Err(SendFrameError::Fatal(format!("no call with {}", friend))),
        }
        if self.echo.len() >= ECHO_QUEUE_FRAMES {
            self.echo.pop_front();
        }
        self.echo.push_back(EchoFrame {
            pcm: pcm.to_vec(),
            sample_count,
            channels,
            sampling_rate,
        });
        Ok(())
    }

    fn send_end_cause(
        &mut self,
        friend: FriendNumber,
        cause: CallEnd,
    ) -> Result<(), SignalingError> {
        debug!("Echo peer {} told {:?}", friend, cause);
        Ok(())
    }

    fn friend_key(&self, friend: FriendNumber) -> Option<String> {
        (friend == self.peer).then(|| format!("{:064X}", 0xEC40_u64 + friend as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(signaling: &mut EchoSignaling, iterations: usize) -> Vec<SignalingEvent> {
        let mut events = Vec::new();
        for _ in 0..iterations {
            signaling.iterate(&mut events);
        }
        events
    }

    #[test]
    fn test_unknown_friend_not_connected() {
        let mut echo = EchoSignaling::new(1);
        assert_eq!(echo.call(9, 48), Err(SignalingError::FriendNotConnected(9)));
    }

    #[test]
    fn test_answers_then_echoes() {
        let mut echo = EchoSignaling::new(1).with_ring_iterations(2);
        echo.call(1, 48).unwrap();
        assert_eq!(echo.call(1, 48), Err(SignalingError::AlreadyInCall(1)));

        let events = run(&mut echo, 2);
        assert!(matches!(
            events.last(),
            Some(SignalingEvent::StateChanged {
                state: PeerState::Active { .. },
                ..
            })
        ));

        echo.send_audio_frame(1, &[7; 480], 480, 1, 24000).unwrap();
        let events = run(&mut echo, 1);
        match &events[0] {
            SignalingEvent::AudioFrame {
                pcm,
                sample_count,
                sampling_rate,
                ..
            } => {
                assert_eq!(*sample_count, 480);
                assert_eq!(*sampling_rate, 24000);
                assert!(pcm.iter().all(|s| *s == 7));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // nothing queued: the peer talks its tone
        let events = run(&mut echo, 1);
        assert!(matches!(
            events[0],
            SignalingEvent::AudioFrame {
                sample_count: PEER_FRAME_SAMPLES,
                ..
            }
        ));
    }

    #[test]
    fn test_hang_up_sends_cause_after_finish() {
        let mut echo = EchoSignaling::new(1)
            .with_ring_iterations(1)
            .with_hang_up_after(2);
        echo.call(1, 48).unwrap();
        let events = run(&mut echo, 4);

        let tail = &events[events.len() - 2..];
        assert_eq!(
            tail[0],
            SignalingEvent::StateChanged {
                friend: 1,
                state: PeerState::Finished
            }
        );
        assert_eq!(
            tail[1],
            SignalingEvent::EndCause {
                friend: 1,
                cause: CallEnd::FriendEnd
            }
        );
        assert!(echo.send_audio_frame(1, &[0; 10], 10, 1, 8000).is_err());
    }

    #[test]
    fn test_incoming_call_waits_for_answer() {
        let mut echo = EchoSignaling::new(4).with_incoming_call();
        let events = run(&mut echo, 3);
        assert_eq!(events, vec![SignalingEvent::IncomingCall { friend: 4 }]);

        echo.answer(4, 48).unwrap();
        let events = run(&mut echo, 1);
        assert!(matches!(events[0], SignalingEvent::AudioFrame { friend: 4, .. }));
    }

    #[test]
    fn test_cancel_ends_call() {
        let mut echo = EchoSignaling::new(1);
        echo.call(1, 48).unwrap();
        echo.control(1, CallControl::Cancel).unwrap();
        assert!(run(&mut echo, 5).is_empty());
    }
}
