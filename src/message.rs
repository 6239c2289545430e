//! Control messages exchanged with the surrounding application

use crate::audio::{SoundKind, StreamKind, StreamInfoState};
use crate::call::{CallEnd, CallState, FriendNumber, HandsetEvent};
use crate::device::{AudioDevInfo, DeviceType};
use crate::error::PhoneError;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Outbound queue for answers and events
pub type EventSink = Sender<Message>;

/// Role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Command,
    Answer,
    Event,
}

/// Typed payload plus routing information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Command id, echoed by the answer. Zero for events.
    pub id: u64,
    pub kind: MessageKind,
    pub payload: Payload,
}

impl Message {
    pub fn command(id: u64, payload: Payload) -> Self {
        Self {
            id,
            kind: MessageKind::Command,
            payload,
        }
    }

    pub fn answer(id: u64, payload: Payload) -> Self {
        Self {
            id,
            kind: MessageKind::Answer,
            payload,
        }
    }

    pub fn event(payload: Payload) -> Self {
        Self {
            id: 0,
            kind: MessageKind::Event,
            payload,
        }
    }

    /// Successful answer to command `id`
    pub fn ok(id: u64) -> Self {
        Self::answer(id, Payload::Ok)
    }

    /// Failed answer to command `id`
    pub fn error(id: u64, error: &PhoneError) -> Self {
        Self::answer(
            id,
            Payload::Error(ErrorInfo {
                code: error.code(),
                description: error.to_string(),
            }),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    CallAction(CallAction),
    CallState(CallState),
    /// Query answered with the current `CallState`
    CallStateRequest,
    FriendCallEndCause(CallEnd),
    PlaybackFinish(SoundKind),
    AudioDevInfo(AudioDevInfo),
    /// Query answered with one `AudioDevInfo` event per device
    AudioDevInfoRequest,
    AudioDevChange(AudioDevChange),
    AudioStreamInfo(AudioStreamInfo),
    AudioTest(AudioTest),
    AudioRecordLevel(AudioRecordLevel),
    Handset(HandsetEvent),
    Ok,
    Error(ErrorInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallActionKind {
    Call,
    Accept,
    Reject,
    End,
    HandsetOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAction {
    pub action: CallActionKind,
    pub peer: FriendNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevChangeFlag {
    Volume,
    Current,
    Default,
    Remove,
}

/// Device inventory change, inbound as a control request or outbound as a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevChange {
    pub flag: DevChangeFlag,
    pub kind: DeviceType,
    pub device_index: u32,
    pub value: u32,
}

/// Per-stream telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub kind: StreamKind,
    pub state: StreamInfoState,
    pub device_index: u32,
    pub volume: u32,
    pub volume_steps: u32,
    pub channels: u8,
    pub has_volume: bool,
    pub volume_writable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTest {
    pub begin: bool,
    pub playback: bool,
    pub record: bool,
}

/// Microphone level report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRecordLevel {
    /// Largest positive sample seen in the window
    pub max: u16,
    /// Window length in milliseconds
    pub time_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: u32,
    pub description: String,
}

/// Send an event, ignoring a closed queue
pub fn emit(sink: &EventSink, payload: Payload) {
    if sink.send(Message::event(payload)).is_err() {
        trace!("Event queue closed, dropping event");
    }
}

/// Send a message, ignoring a closed queue
pub fn send(sink: &EventSink, message: Message) {
    if sink.send(message).is_err() {
        trace!("Event queue closed, dropping message");
    }
}
