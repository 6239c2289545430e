//! Call state data model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session-scoped numeric handle of a peer
pub type FriendNumber = u32;

/// Who initiated the current call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Undefined,
    Incoming,
    Outgoing,
}

/// Progress of the current call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    #[default]
    Undefined,
    WaitingAnswer,
    InProgress,
    IsComplete,
}

/// Why a call reached `IsComplete`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallEnd {
    #[default]
    Undefined,
    SelfEnd,
    SelfReject,
    FriendEnd,
    FriendReject,
    FriendBusy,
    NotConnected,
    Error,
}

impl CallEnd {
    /// The cause as the peer should record it
    pub fn for_peer(self) -> CallEnd {
        match self {
            CallEnd::SelfEnd => CallEnd::FriendEnd,
            CallEnd::SelfReject => CallEnd::FriendReject,
            other => other,
        }
    }
}

/// Remote call participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub handle: FriendNumber,
    /// Hex encoded public key
    pub key: String,
}

/// Complete call state, mutated only by the call state machine thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallState {
    pub direction: Direction,
    pub status: CallStatus,
    /// Meaningful only while `status == IsComplete`
    pub end: CallEnd,
    pub peer: Option<Peer>,
}

impl CallState {
    /// A call is waiting for an answer or in progress
    pub fn is_active(&self) -> bool {
        self.direction != Direction::Undefined
    }

    pub fn is_idle(&self) -> bool {
        self.direction == Direction::Undefined && self.status == CallStatus::Undefined
    }

    pub fn peer_handle(&self) -> Option<FriendNumber> {
        self.peer.as_ref().map(|p| p.handle)
    }

    /// Check `direction`/`status` combination
    pub fn is(&self, direction: Direction, status: CallStatus) -> bool {
        self.direction == direction && self.status == status
    }

    /// Move to `IsComplete` with the given cause, keeping the peer for reporting
    pub fn complete(&mut self, end: CallEnd) {
        self.direction = Direction::Undefined;
        self.status = CallStatus::IsComplete;
        self.end = end;
    }

    /// Re-arm after a completed call
    pub fn rearm(&mut self) {
        self.direction = Direction::Undefined;
        self.status = CallStatus::Undefined;
        self.end = CallEnd::Undefined;
        self.peer = None;
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.direction, self.status)?;
        if self.status == CallStatus::IsComplete {
            write!(f, " ({:?})", self.end)?;
        }
        if let Some(peer) = &self.peer {
            write!(f, " peer={}", peer.handle)?;
        }
        Ok(())
    }
}
