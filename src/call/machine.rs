//! Call state machine
//!
//! Owns the signaling session and the call state. Everything here runs on
//! the call thread: commands from other threads arrive as [`CallCommand`]s,
//! library callbacks as [`SignalingEvent`]s collected by `iterate`.

use crate::audio::{AudioDeviceManager, SoundKind, StreamKind, VoiceFrameInfo};
use crate::call::{
    CallControl, CallEnd, CallSignaling, CallState, CallStatus, Direction, FriendNumber,
    HandsetEvent, Peer, PeerState, SendFrameError, SignalingEvent, TelephoneAdapter,
};
use crate::error::{PhoneError, Result};
use crate::message::{
    emit, send, AudioTest, CallAction, CallActionKind, EventSink, Message, Payload,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Call tunables
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Audio bit rate requested from the signaling library, kbit/s
    pub audio_bitrate: u32,
    /// Received frames discarded before audio is played
    pub warmup_frames: u32,
    /// Grace period for a peer-supplied end cause after a remote hang-up
    pub end_cause_timeout: Duration,
    /// Upper bound of the loop interval while a call is active
    pub max_active_interval: Duration,
    /// Attempts per outbound frame on synchronization errors
    pub send_retries: u32,
    pub send_retry_sleep: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            audio_bitrate: 48,
            warmup_frames: 10,
            end_cause_timeout: Duration::from_millis(1000),
            max_active_interval: Duration::from_millis(50),
            send_retries: 5,
            send_retry_sleep: Duration::from_micros(500),
        }
    }
}

/// Request queued to the call thread
#[derive(Debug, Clone, PartialEq)]
pub enum CallCommand {
    Action { id: u64, action: CallAction },
    AudioTest { id: u64, test: AudioTest },
    /// Answered with the current `CallState`
    StateQuery { id: u64 },
    PlaybackFinished(SoundKind),
    Handset(HandsetEvent),
    Shutdown,
}

#[derive(Debug, Default)]
struct CallCounters {
    bytes_sent: u64,
    bytes_received: u64,
    frames_sent: u64,
    inbound_dropped: u64,
    outbound_dropped: u64,
}

pub struct CallStateMachine {
    signaling: Box<dyn CallSignaling>,
    adapter: Box<dyn TelephoneAdapter>,
    audio: Arc<AudioDeviceManager>,
    events: EventSink,
    config: CallConfig,
    state: CallState,
    /// Peer receiving outbound voice frames
    destination: Option<FriendNumber>,
    /// Filtered capture is looped to the speaker (audio test)
    loopback: bool,
    test_active: bool,
    ringing: bool,
    frames_received: u32,
    /// Geometry the call audio was last started with, successful or not
    call_audio: Option<VoiceFrameInfo>,
    /// Remote hang-up time while the end cause is still outstanding
    pending_end: Option<Instant>,
    peer_cause: Option<CallEnd>,
    counters: CallCounters,
    signal_buf: Vec<SignalingEvent>,
    frame_buf: Vec<u8>,
    pcm_buf: Vec<i16>,
}

impl CallStateMachine {
    pub fn new(
        signaling: Box<dyn CallSignaling>,
        adapter: Box<dyn TelephoneAdapter>,
        audio: Arc<AudioDeviceManager>,
        events: EventSink,
        config: CallConfig,
    ) -> Self {
        Self {
            signaling,
            adapter,
            audio,
            events,
            config,
            state: CallState::default(),
            destination: None,
            loopback: false,
            test_active: false,
            ringing: false,
            frames_received: 0,
            call_audio: None,
            pending_end: None,
            peer_cause: None,
            counters: CallCounters::default(),
            signal_buf: Vec::new(),
            frame_buf: Vec::new(),
            pcm_buf: Vec::new(),
        }
    }

    /// Initialize the signaling session
    pub fn init(&mut self) -> Result<()> {
        self.signaling.init()?;
        info!("Call signaling initialized");
        Ok(())
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// Sleep interval until the next iteration
    pub fn next_interval(&self) -> Duration {
        let hint = self.signaling.iteration_interval();
        if self.state.is_active() || self.destination.is_some() || self.loopback {
            hint.min(self.config.max_active_interval)
        } else {
            hint
        }
    }

    /// One loop step: advance signaling, check timers, relay one outbound frame
    pub fn iterate(&mut self, now: Instant) {
        let mut signals = std::mem::take(&mut self.signal_buf);
        self.signaling.iterate(&mut signals);
        for event in signals.drain(..) {
            self.handle_signal(event, now);
        }
        self.signal_buf = signals;

        self.poll(now);
        self.relay_outbound();
    }

    /// Emit a deferred end state once the grace period has passed
    pub fn poll(&mut self, now: Instant) {
        if let Some(since) = self.pending_end {
            if now.saturating_duration_since(since) >= self.config.end_cause_timeout {
                debug!("No end cause from peer, reporting {:?}", self.state.end);
                self.pending_end = None;
                self.publish_state();
            }
        }
    }

    pub fn handle_command(&mut self, command: CallCommand) {
        trace!("Call command {:?}", command);
        match command {
            CallCommand::Action { id, action } => {
                let result = self.on_action(action);
                self.answer(id, result);
            }
            CallCommand::AudioTest { id, test } => {
                let result = self.on_audio_test(test);
                self.answer(id, result);
            }
            CallCommand::StateQuery { id } => {
                send(
                    &self.events,
                    Message::answer(id, Payload::CallState(self.state.clone())),
                );
            }
            CallCommand::PlaybackFinished(sound) => self.on_playback_finished(sound),
            CallCommand::Handset(event) => self.on_handset(event),
            CallCommand::Shutdown => self.shutdown(),
        }
    }

    fn answer(&self, id: u64, result: Result<()>) {
        match result {
            Ok(()) => send(&self.events, Message::ok(id)),
            Err(e) => {
                warn!("Command {} failed: {}", id, e);
                send(&self.events, Message::error(id, &e));
            }
        }
    }

    fn on_action(&mut self, action: CallAction) -> Result<()> {
        let peer = action.peer;
        match action.action {
            CallActionKind::Call => self.place_call(peer),
            CallActionKind::Accept => self.accept(peer),
            CallActionKind::Reject => {
                self.check_peer(peer)?;
                if self.state.is(Direction::Incoming, CallStatus::WaitingAnswer) {
                    self.local_end(CallEnd::SelfReject);
                    Ok(())
                } else if self.state.is_active() {
                    self.local_end(CallEnd::SelfEnd);
                    Ok(())
                } else {
                    Err(self.invalid_state())
                }
            }
            CallActionKind::End => {
                if self.state.status == CallStatus::IsComplete {
                    self.rearm();
                    return Ok(());
                }
                self.check_peer(peer)?;
                if self.state.is_active() {
                    self.local_end(CallEnd::SelfEnd);
                    Ok(())
                } else {
                    Err(self.invalid_state())
                }
            }
            CallActionKind::HandsetOn => {
                self.on_handset(HandsetEvent::On);
                Ok(())
            }
        }
    }

    fn invalid_state(&self) -> PhoneError {
        PhoneError::InvalidCallState {
            state: self.state.to_string(),
        }
    }

    fn check_peer(&self, peer: FriendNumber) -> Result<()> {
        match self.state.peer_handle() {
            Some(expected) if self.state.is_active() && expected != peer => {
                Err(PhoneError::PeerMismatch {
                    expected,
                    actual: peer,
                })
            }
            _ => Ok(()),
        }
    }

    fn place_call(&mut self, peer: FriendNumber) -> Result<()> {
        if self.state.direction != Direction::Undefined {
            return Err(self.invalid_state());
        }
        self.flush_pending_end();
        self.stop_test();

        self.state = CallState {
            direction: Direction::Outgoing,
            status: CallStatus::WaitingAnswer,
            end: CallEnd::Undefined,
            peer: Some(self.peer(peer)),
        };
        self.peer_cause = None;
        info!("Calling friend {}", peer);

        if let Err(e) = self.signaling.call(peer, self.config.audio_bitrate) {
            error!("Call to friend {} failed: {}", peer, e);
            self.finish_call(e.end_cause());
            self.changed();
            return Err(e.into());
        }
        self.changed();
        Ok(())
    }

    fn accept(&mut self, peer: FriendNumber) -> Result<()> {
        if !self.state.is(Direction::Incoming, CallStatus::WaitingAnswer) {
            return Err(self.invalid_state());
        }
        self.check_peer(peer)?;

        self.state.status = CallStatus::InProgress;
        info!("Answering friend {}", peer);

        if let Err(e) = self.signaling.answer(peer, self.config.audio_bitrate) {
            error!("Answering friend {} failed: {}", peer, e);
            self.finish_call(e.end_cause());
            self.changed();
            return Err(e.into());
        }
        self.start_relay(peer);
        self.changed();
        Ok(())
    }

    /// Local hang-up or rejection
    fn local_end(&mut self, cause: CallEnd) {
        if let Some(peer) = self.state.peer_handle() {
            if let Err(e) = self.signaling.control(peer, CallControl::Cancel) {
                warn!("Cancelling call with friend {}: {}", peer, e);
            }
            if let Err(e) = self.signaling.send_end_cause(peer, cause.for_peer()) {
                warn!("Sending end cause to friend {}: {}", peer, e);
            }
        }
        info!("Call ended locally ({:?})", cause);
        self.finish_call(cause);
        self.changed();
    }

    fn start_relay(&mut self, peer: FriendNumber) {
        self.destination = Some(peer);
        self.frames_received = 0;
        self.call_audio = None;
        self.counters = CallCounters::default();
    }

    /// Stop outbound forwarding and the call audio paths
    fn end_calling(&mut self) {
        self.destination = None;
        self.audio.stop_call_audio();

        let c = &self.counters;
        info!(
            "Call audio: {} bytes sent in {} frames, {} bytes received, {} outbound and {} inbound frames dropped",
            c.bytes_sent, c.frames_sent, c.bytes_received, c.outbound_dropped, c.inbound_dropped
        );
        self.counters = CallCounters::default();
        self.frames_received = 0;
        self.call_audio = None;
    }

    /// Move to `IsComplete`, start the outcome sound
    fn finish_call(&mut self, cause: CallEnd) {
        self.end_calling();
        self.state.complete(cause);
        self.update_indicators();

        let sound = match cause {
            CallEnd::FriendEnd | CallEnd::FriendReject | CallEnd::FriendBusy => {
                Some(SoundKind::Busy)
            }
            CallEnd::NotConnected | CallEnd::Error => Some(SoundKind::Fail),
            _ => None,
        };
        if let Some(sound) = sound {
            self.play(sound);
        }
    }

    fn rearm(&mut self) {
        self.flush_pending_end();
        if matches!(self.audio.playing(), Some(SoundKind::Busy | SoundKind::Fail)) {
            self.audio.stop_playback();
        }
        self.state.rearm();
        self.peer_cause = None;
        debug!("Call state re-armed");
        self.changed();
    }

    /// Publish a deferred end state now
    fn flush_pending_end(&mut self) {
        if self.pending_end.take().is_some() {
            self.publish_state();
        }
    }

    fn peer(&self, handle: FriendNumber) -> Peer {
        Peer {
            handle,
            key: self.signaling.friend_key(handle).unwrap_or_default(),
        }
    }

    pub fn handle_signal(&mut self, event: SignalingEvent, now: Instant) {
        match event {
            SignalingEvent::IncomingCall { friend } => self.on_incoming(friend),
            SignalingEvent::StateChanged { friend, state } => {
                self.on_peer_state(friend, state, now)
            }
            SignalingEvent::AudioFrame {
                friend,
                pcm,
                sample_count,
                channels,
                sampling_rate,
            } => {
                if self.destination != Some(friend) {
                    trace!("Dropping frame from friend {} outside a call", friend);
                    return;
                }
                self.on_frame(&pcm, sample_count, channels, sampling_rate);
            }
            SignalingEvent::EndCause { friend, cause } => self.on_end_cause(friend, cause),
        }
    }

    fn on_incoming(&mut self, friend: FriendNumber) {
        if self.state.is_active() || self.adapter.blocks_incoming() {
            info!("Rejecting incoming call from friend {}: line busy", friend);
            if let Err(e) = self.signaling.control(friend, CallControl::Cancel) {
                warn!("Rejecting friend {}: {}", friend, e);
            }
            if let Err(e) = self.signaling.send_end_cause(friend, CallEnd::FriendBusy) {
                warn!("Sending busy to friend {}: {}", friend, e);
            }
            return;
        }

        self.flush_pending_end();
        self.stop_test();
        self.state = CallState {
            direction: Direction::Incoming,
            status: CallStatus::WaitingAnswer,
            end: CallEnd::Undefined,
            peer: Some(self.peer(friend)),
        };
        self.peer_cause = None;
        info!("Incoming call from friend {}", friend);
        self.changed();
    }

    fn on_peer_state(&mut self, friend: FriendNumber, state: PeerState, now: Instant) {
        let Some(expected) = self.state.peer_handle().filter(|_| self.state.is_active()) else {
            debug!("Ignoring {:?} from friend {} outside a call", state, friend);
            return;
        };

        if expected != friend {
            if self.state.is(Direction::Outgoing, CallStatus::WaitingAnswer)
                && matches!(state, PeerState::Active { .. })
            {
                error!(
                    "Friend {} answered a call placed to friend {}",
                    friend, expected
                );
                if let Err(e) = self.signaling.control(expected, CallControl::Cancel) {
                    warn!("Cancelling call with friend {}: {}", expected, e);
                }
                self.finish_call(CallEnd::Error);
                self.changed();
            } else {
                warn!("Ignoring {:?} from friend {} (call with {})", state, friend, expected);
            }
            return;
        }

        match state {
            PeerState::Active { sending, accepting } => {
                if self.state.is(Direction::Outgoing, CallStatus::WaitingAnswer) {
                    info!("Friend {} answered", friend);
                    self.state.status = CallStatus::InProgress;
                    self.start_relay(friend);
                    self.changed();
                } else {
                    debug!(
                        "Friend {} audio: sending {}, accepting {}",
                        friend, sending, accepting
                    );
                }
            }
            PeerState::Finished => {
                let unanswered = self.state.is(Direction::Outgoing, CallStatus::WaitingAnswer);
                let peer_cause = self.peer_cause.take();
                let cause = peer_cause.unwrap_or(if unanswered {
                    CallEnd::FriendReject
                } else {
                    CallEnd::FriendEnd
                });
                info!("Friend {} finished the call", friend);
                self.finish_call(cause);
                if peer_cause.is_none() {
                    // wait for the peer's end cause before reporting
                    self.pending_end = Some(now);
                }
                self.changed();
            }
            PeerState::Error => {
                error!("Call with friend {} failed", friend);
                self.finish_call(CallEnd::Error);
                self.changed();
            }
        }
    }

    fn on_end_cause(&mut self, friend: FriendNumber, cause: CallEnd) {
        if self.state.peer_handle() != Some(friend) {
            debug!("Ignoring end cause {:?} from friend {}", cause, friend);
            return;
        }
        emit(&self.events, Payload::FriendCallEndCause(cause));
        if self.state.is_active() {
            // arrives ahead of the finish signal
            self.peer_cause = Some(cause);
        } else if self.pending_end.take().is_some() {
            debug!("Friend {} end cause {:?}", friend, cause);
            self.state.end = cause;
            self.publish_state();
        }
    }

    fn on_frame(&mut self, pcm: &[i16], sample_count: usize, channels: u8, sampling_rate: u32) {
        self.frames_received = self.frames_received.saturating_add(1);
        if self.frames_received <= self.config.warmup_frames {
            trace!("Warm-up frame {}", self.frames_received);
            return;
        }

        let reinit = !self
            .call_audio
            .is_some_and(|info| info.matches(sample_count, channels, sampling_rate));
        if reinit {
            let info = VoiceFrameInfo::from_frame(sample_count, channels, sampling_rate);
            info!("Voice frames: {}", info);
            self.start_call_audio(&info);
        }

        // a failed voice stream stays down until the next call
        if !self.audio.is_active(StreamKind::Voice) {
            self.counters.inbound_dropped += 1;
            trace!("No voice stream, dropping frame");
            return;
        }

        let buffers = self.audio.buffers().clone();

        self.frame_buf.clear();
        let samples = (sample_count * channels as usize).min(pcm.len());
        self.frame_buf
            .extend(pcm[..samples].iter().flat_map(|s| s.to_le_bytes()));

        if buffers.playback.write(&self.frame_buf) {
            self.counters.bytes_received += self.frame_buf.len() as u64;
        } else {
            self.counters.inbound_dropped += 1;
            debug!(
                "Playback buffer full, dropping frame ({} of {} bytes free)",
                buffers.playback.free(),
                buffers.playback.capacity()
            );
        }
    }

    /// Open the voice and record streams for this call
    ///
    /// Each stream is started on its own; a failure is not retried for the
    /// same frame geometry.
    fn start_call_audio(&mut self, info: &VoiceFrameInfo) {
        self.call_audio = Some(*info);
        if let Err(e) = self.audio.start_voice(info) {
            error!("Starting voice stream: {}", e);
        }
        if let Err(e) = self.audio.start_record(info) {
            error!("Starting record stream: {}", e);
        }
    }

    /// Forward one filtered frame to the peer (or the speaker in loopback)
    fn relay_outbound(&mut self) {
        if self.destination.is_none() && !self.loopback {
            return;
        }
        let buffers = self.audio.buffers().clone();
        let Some(info) = buffers.frame_info.snapshot() else {
            return;
        };
        self.frame_buf.resize(info.buffer_size, 0);
        if !buffers.filtered.read(&mut self.frame_buf) {
            return;
        }

        let Some(friend) = self.destination else {
            if !buffers.playback.write(&self.frame_buf) {
                trace!("Loopback: playback buffer full");
            }
            return;
        };

        self.pcm_buf.clear();
        self.pcm_buf.extend(
            self.frame_buf
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );

        let attempts = self.config.send_retries.max(1);
        for attempt in 1..=attempts {
            match self.signaling.send_audio_frame(
                friend,
                &self.pcm_buf,
                info.sample_count,
                info.channels,
                info.sampling_rate,
            ) {
                Ok(()) => {
                    self.counters.frames_sent += 1;
                    self.counters.bytes_sent += self.frame_buf.len() as u64;
                    return;
                }
                Err(SendFrameError::Sync) if attempt < attempts => {
                    thread::sleep(self.config.send_retry_sleep);
                }
                Err(e) => {
                    self.counters.outbound_dropped += 1;
                    debug!("Dropping outbound frame after {} attempts: {}", attempt, e);
                    return;
                }
            }
        }
    }

    fn on_audio_test(&mut self, test: AudioTest) -> Result<()> {
        if !test.begin {
            self.stop_test();
            return Ok(());
        }
        if self.state.is_active() {
            return Err(PhoneError::CallInProgress);
        }

        self.stop_test();
        if let Err(e) = self.audio.begin_test(&test) {
            self.audio.end_test();
            return Err(e);
        }
        self.test_active = true;
        self.loopback = test.record && test.playback;
        Ok(())
    }

    fn stop_test(&mut self) {
        if self.test_active {
            self.audio.end_test();
            self.test_active = false;
            self.loopback = false;
        }
    }

    fn on_playback_finished(&mut self, sound: SoundKind) {
        debug!("Playback of {} finished", sound);
        if sound == SoundKind::Test && self.test_active && !self.audio.is_active(StreamKind::Record) {
            self.test_active = false;
        }
        if self.state.status == CallStatus::IsComplete {
            self.rearm();
        }
    }

    fn on_handset(&mut self, event: HandsetEvent) {
        debug!("Handset {:?} in {}", event, self.state);
        match event {
            HandsetEvent::Off => {
                if self.state.is(Direction::Incoming, CallStatus::WaitingAnswer) {
                    if let Some(peer) = self.state.peer_handle() {
                        if let Err(e) = self.accept(peer) {
                            warn!("Answering on handset lift: {}", e);
                        }
                    }
                } else if self.state.status == CallStatus::IsComplete {
                    self.rearm();
                }
            }
            HandsetEvent::On => {
                if self.state.is(Direction::Incoming, CallStatus::WaitingAnswer) {
                    self.local_end(CallEnd::SelfReject);
                } else if self.state.is_active() {
                    self.local_end(CallEnd::SelfEnd);
                }
            }
        }
    }

    /// End any call and release audio
    pub fn shutdown(&mut self) {
        if self.state.is_active() {
            self.local_end(CallEnd::SelfEnd);
        }
        self.flush_pending_end();
        self.stop_test();
        self.audio.stop_playback();
        if self.ringing {
            self.adapter.ringing_stopped();
            self.ringing = false;
        }
        info!("Call state machine stopped");
    }

    fn play(&self, sound: SoundKind) {
        if let Err(e) = self.audio.play(sound) {
            warn!("Cannot play {}: {}", sound, e);
        }
    }

    /// Align ringing and call progress tones with the state
    fn update_indicators(&mut self) {
        let ring = self.state.is(Direction::Incoming, CallStatus::WaitingAnswer);
        if ring != self.ringing {
            if ring {
                self.adapter.ringing_requested();
            } else {
                self.adapter.ringing_stopped();
            }
            self.ringing = ring;
        }

        let tone = if ring {
            Some(SoundKind::Ring)
        } else if self.state.is(Direction::Outgoing, CallStatus::WaitingAnswer) {
            Some(SoundKind::Outgoing)
        } else {
            None
        };
        let playing = self.audio.playing();
        match tone {
            Some(sound) if playing != Some(sound) => self.play(sound),
            None if matches!(playing, Some(SoundKind::Ring | SoundKind::Outgoing)) => {
                self.audio.stop_playback()
            }
            _ => {}
        }
    }

    /// State changed: refresh indicators and report unless deferred
    fn changed(&mut self) {
        self.update_indicators();
        if self.pending_end.is_none() {
            self.publish_state();
        }
    }

    fn publish_state(&self) {
        info!("Call state: {}", self.state);
        emit(&self.events, Payload::CallState(self.state.clone()));
    }
}
