//! Hooks into an optional landline telephone adapter

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Handset transition reported by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandsetEvent {
    /// Handset put down
    On,
    /// Handset lifted
    Off,
}

/// Telephone adapter as seen by the call state machine
pub trait TelephoneAdapter: Send {
    /// Handset lifted
    fn handset_off_hook(&self) -> bool;

    /// Whether the local handset state forbids an incoming call
    ///
    /// A lifted handset while no call exists means the line is being used
    /// locally.
    fn blocks_incoming(&self) -> bool {
        self.handset_off_hook()
    }

    /// Start ringing the telephone
    fn ringing_requested(&mut self);

    fn ringing_stopped(&mut self);
}

/// No adapter attached
#[derive(Debug, Default)]
pub struct NoAdapter;

impl TelephoneAdapter for NoAdapter {
    fn handset_off_hook(&self) -> bool {
        false
    }

    fn ringing_requested(&mut self) {
        debug!("Ringing requested, no telephone adapter attached");
    }

    fn ringing_stopped(&mut self) {}
}
