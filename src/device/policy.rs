//! Heuristics for picking a current device when no default is persisted

use crate::device::{AudioDevInfo, DeviceType};
use tracing::debug;

/// Placeholder in a keyword that expands to the machine's hostname
pub const HOSTNAME_PLACEHOLDER: &str = "{hostname}";

/// Decides whether a newly added device should become current
pub trait CurrentDevicePolicy: Send + Sync {
    fn prefer(&self, device: &AudioDevInfo) -> bool;
}

/// Never promotes
#[derive(Debug, Default)]
pub struct NoPreference;

impl CurrentDevicePolicy for NoPreference {
    fn prefer(&self, _device: &AudioDevInfo) -> bool {
        false
    }
}

/// Promotes devices whose name or description contains a keyword
#[derive(Debug, Clone)]
pub struct KeywordPolicy {
    sink_keywords: Vec<String>,
    source_keywords: Vec<String>,
}

impl KeywordPolicy {
    pub fn new(sink_keywords: Vec<String>, source_keywords: Vec<String>) -> Self {
        let hostname = hostname();
        let expand = |keywords: Vec<String>| -> Vec<String> {
            keywords
                .into_iter()
                .filter_map(|k| {
                    if k.contains(HOSTNAME_PLACEHOLDER) {
                        hostname
                            .as_deref()
                            .map(|h| k.replace(HOSTNAME_PLACEHOLDER, h))
                    } else {
                        Some(k)
                    }
                })
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        };

        Self {
            sink_keywords: expand(sink_keywords),
            source_keywords: expand(source_keywords),
        }
    }

    fn keywords(&self, kind: DeviceType) -> &[String] {
        match kind {
            DeviceType::Sink => &self.sink_keywords,
            DeviceType::Source => &self.source_keywords,
        }
    }
}

impl CurrentDevicePolicy for KeywordPolicy {
    fn prefer(&self, device: &AudioDevInfo) -> bool {
        let name = device.name.to_lowercase();
        let description = device.description.to_lowercase();
        let matched = self
            .keywords(device.kind)
            .iter()
            .any(|k| name.contains(k.as_str()) || description.contains(k.as_str()));
        if matched {
            debug!("Device {} matches preferred keywords", device.name);
        }
        matched
    }
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}
