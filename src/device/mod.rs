//! Device inventory, current-device policy and default-device store

mod list;
mod policy;
mod store;

pub use list::{AddOutcome, AudioDevInfo, DeviceList, DeviceType, RemoveOutcome};
pub use policy::{CurrentDevicePolicy, KeywordPolicy, NoPreference, HOSTNAME_PLACEHOLDER};
pub use store::{DefaultDeviceStore, MemoryStore};
