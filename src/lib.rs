//! deskphone - desk telephone for a peer-to-peer call network
//!
//! Bridges encrypted peer-to-peer calls to local speakers and microphones:
//! call lifecycle, voice transport through ring buffers, noise filtering
//! and notification sounds.

pub mod audio;
pub mod call;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod message;
pub mod sim;

#[cfg(test)]
mod testing;

pub use context::PhoneContext;
pub use error::{PhoneError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
