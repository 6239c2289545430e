//! Device and stream volume values

use serde::{Deserialize, Serialize};

/// Per-channel volume as reported for a device
///
/// Devices are only ever driven with one value for all channels; the
/// per-channel form exists for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelVolumes(Vec<u32>);

impl ChannelVolumes {
    /// Same volume on every channel
    pub fn uniform(channels: u8, volume: u32) -> Self {
        Self(vec![volume; channels.max(1) as usize])
    }

    pub fn channels(&self) -> usize {
        self.0.len()
    }

    pub fn values(&self) -> &[u32] {
        &self.0
    }

    /// Mean of all channels
    pub fn average(&self) -> u32 {
        if self.0.is_empty() {
            return 0;
        }
        (self.0.iter().map(|&v| v as u64).sum::<u64>() / self.0.len() as u64) as u32
    }
}

/// Express `volume` as a percentage of `base` (the device's 0 dB point)
pub fn to_percent(volume: u32, base: u32) -> u32 {
    if base == 0 {
        return 0;
    }
    ((volume as u64 * 100 + base as u64 / 2) / base as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_volumes() {
        let volumes = ChannelVolumes::uniform(2, 42);
        assert_eq!(volumes.values(), &[42, 42]);
        assert_eq!(volumes.average(), 42);

        assert_eq!(ChannelVolumes::uniform(0, 5).channels(), 1);
    }

    #[test]
    fn test_percent_conversion() {
        assert_eq!(to_percent(32768, 65536), 50);
        assert_eq!(to_percent(65536, 65536), 100);
        assert_eq!(to_percent(10, 0), 0);
    }
}
