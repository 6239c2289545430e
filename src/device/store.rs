//! Access to the persisted default device names

use crate::device::DeviceType;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Lookup and update of the persisted default device per type
///
/// Persistence itself belongs to the configuration store of the embedding
/// application.
pub trait DefaultDeviceStore: Send + Sync {
    fn default_name(&self, kind: DeviceType) -> Option<String>;

    fn set_default_name(&self, kind: DeviceType, name: &str);
}

/// Process-local store, seeded from configuration
#[derive(Debug, Default)]
pub struct MemoryStore {
    names: Mutex<HashMap<DeviceType, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with optional sink/source names (empty strings are ignored)
    pub fn with_defaults(sink: &str, source: &str) -> Self {
        let store = Self::new();
        if !sink.is_empty() {
            store.set_default_name(DeviceType::Sink, sink);
        }
        if !source.is_empty() {
            store.set_default_name(DeviceType::Source, source);
        }
        store
    }
}

impl DefaultDeviceStore for MemoryStore {
    fn default_name(&self, kind: DeviceType) -> Option<String> {
        self.names.lock().get(&kind).cloned()
    }

    fn set_default_name(&self, kind: DeviceType, name: &str) {
        debug!("Default {} set to {}", kind, name);
        self.names.lock().insert(kind, name.to_string());
    }
}
