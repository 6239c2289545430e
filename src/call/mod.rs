//! Call state machine and its collaborators

mod adapter;
mod machine;
mod service;
mod signaling;
mod state;

pub use adapter::{HandsetEvent, NoAdapter, TelephoneAdapter};
pub use machine::{CallCommand, CallConfig, CallStateMachine};
pub use service::CallService;
pub use signaling::{
    CallControl, CallSignaling, PeerState, SendFrameError, SignalingError, SignalingEvent,
};
pub use state::{CallEnd, CallState, CallStatus, Direction, FriendNumber, Peer};
