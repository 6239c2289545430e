//! Unified error types for deskphone

use crate::audio::{HardwareError, StreamKind};
use crate::call::SignalingError;
use crate::config::ConfigError;
use crate::device::DeviceType;
use thiserror::Error;

/// Main error type for deskphone operations
#[derive(Error, Debug)]
pub enum PhoneError {
    /// Audio hardware subsystem failure
    #[error("Audio hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Call signaling request rejected
    #[error("Call signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// Device index not present in the device list
    #[error("{kind} device #{index} not found")]
    DeviceNotFound { kind: DeviceType, index: u32 },

    /// Command not valid in the current call state
    #[error("Not allowed in call state {state}")]
    InvalidCallState { state: String },

    /// Command refers to a different peer than the active call
    #[error("Peer {actual} does not match call peer {expected}")]
    PeerMismatch { expected: u32, actual: u32 },

    /// Managed stream is not open
    #[error("No active {0} stream")]
    StreamNotActive(StreamKind),

    /// Audio test requested while a call is active
    #[error("A call is in progress")]
    CallInProgress,

    /// Notification sound could not be opened or decoded
    #[error("Sound file '{path}': {message}")]
    Sound { path: String, message: String },

    /// Configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Thread communication error
    #[error("Thread communication error: {0}")]
    ChannelError(String),
}

/// Result type alias for deskphone operations
pub type Result<T> = std::result::Result<T, PhoneError>;

impl PhoneError {
    /// Create a sound error with context
    pub fn sound(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Sound {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Stable numeric code used in error answers
    pub fn code(&self) -> u32 {
        match self {
            PhoneError::Hardware(_) => 1,
            PhoneError::Signaling(_) => 2,
            PhoneError::DeviceNotFound { .. } => 3,
            PhoneError::InvalidCallState { .. } => 4,
            PhoneError::PeerMismatch { .. } => 5,
            PhoneError::CallInProgress => 6,
            PhoneError::StreamNotActive(_) => 7,
            PhoneError::Sound { .. } => 8,
            PhoneError::Config(_) => 9,
            PhoneError::ChannelError(_) => 10,
        }
    }

    /// Check if the failure is local to one operation (a later retry may succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PhoneError::Hardware(_)
                | PhoneError::Signaling(_)
                | PhoneError::DeviceNotFound { .. }
                | PhoneError::StreamNotActive(_)
                | PhoneError::Sound { .. }
        )
    }
}
