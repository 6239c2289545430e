//! Interface to the peer-to-peer call signaling library

use crate::call::{CallEnd, FriendNumber};
use std::time::Duration;
use thiserror::Error;

/// Call control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallControl {
    Cancel,
    MuteAudio,
    UnmuteAudio,
}

/// Call state reported by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Peer hung up or rejected
    Finished,
    /// Call failed on the peer side
    Error,
    /// Call is up; flags tell which audio directions are active
    Active { sending: bool, accepting: bool },
}

/// Callback from the signaling library, collected during `iterate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    IncomingCall {
        friend: FriendNumber,
    },
    StateChanged {
        friend: FriendNumber,
        state: PeerState,
    },
    AudioFrame {
        friend: FriendNumber,
        pcm: Vec<i16>,
        sample_count: usize,
        channels: u8,
        sampling_rate: u32,
    },
    /// Out-of-band end cause sent by the peer
    EndCause {
        friend: FriendNumber,
        cause: CallEnd,
    },
}

/// Rejected signaling request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Friend {0} not found")]
    FriendNotFound(FriendNumber),

    #[error("Friend {0} is not connected")]
    FriendNotConnected(FriendNumber),

    #[error("Friend {0} is already in a call")]
    AlreadyInCall(FriendNumber),

    #[error("Invalid bit rate {0}")]
    InvalidBitrate(u32),

    #[error("Signaling session not initialized")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl SignalingError {
    /// Call end cause recorded when a request fails
    pub fn end_cause(&self) -> CallEnd {
        match self {
            SignalingError::FriendNotFound(_) | SignalingError::FriendNotConnected(_) => {
                CallEnd::NotConnected
            }
            _ => CallEnd::Error,
        }
    }
}

/// Frame send failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendFrameError {
    /// Library busy; retrying shortly may succeed
    #[error("Synchronization error")]
    Sync,

    #[error("Send failed: {0}")]
    Fatal(String),
}

/// Call signaling session
///
/// The library reports everything from inside `iterate`, which always runs
/// on the call thread.
pub trait CallSignaling: Send {
    fn init(&mut self) -> Result<(), SignalingError>;

    /// Advance the library and collect the callbacks it raised
    fn iterate(&mut self, events: &mut Vec<SignalingEvent>);

    /// Time until the next `iterate` is due
    fn iteration_interval(&self) -> Duration;

    /// Place a call; bit rate in kbit/s
    fn call(&mut self, friend: FriendNumber, audio_bitrate: u32) -> Result<(), SignalingError>;

    fn answer(&mut self, friend: FriendNumber, audio_bitrate: u32) -> Result<(), SignalingError>;

    fn control(&mut self, friend: FriendNumber, control: CallControl)
        -> Result<(), SignalingError>;

    fn send_audio_frame(
        &mut self,
        friend: FriendNumber,
        pcm: &[i16],
        sample_count: usize,
        channels: u8,
        sampling_rate: u32,
    ) -> Result<(), SendFrameError>;

    /// Tell the peer why the call ended
    fn send_end_cause(&mut self, friend: FriendNumber, cause: CallEnd)
        -> Result<(), SignalingError>;

    /// Stable public key of a friend, if known
    fn friend_key(&self, friend: FriendNumber) -> Option<String>;
}
