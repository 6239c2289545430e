//! Framing description of the active voice stream

use parking_lot::Mutex;
use std::fmt;

/// Bytes per PCM sample (signed 16-bit little endian)
pub const SAMPLE_SIZE: usize = 2;

/// Immutable description of one voice frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceFrameInfo {
    /// Frame duration in microseconds
    pub latency_us: u32,
    pub channels: u8,
    /// Bytes per sample
    pub sample_size: usize,
    /// Samples per channel in one frame
    pub sample_count: usize,
    pub sampling_rate: u32,
    /// `sample_count * sample_size * channels`
    pub buffer_size: usize,
}

impl VoiceFrameInfo {
    pub fn new(
        latency_us: u32,
        channels: u8,
        sample_size: usize,
        sample_count: usize,
        sampling_rate: u32,
    ) -> Self {
        Self {
            latency_us,
            channels,
            sample_size,
            sample_count,
            sampling_rate,
            buffer_size: sample_count * sample_size * channels as usize,
        }
    }

    /// Describe a frame from its observed geometry
    pub fn from_frame(sample_count: usize, channels: u8, sampling_rate: u32) -> Self {
        let latency_us = if sampling_rate == 0 {
            0
        } else {
            (sample_count as u64 * 1_000_000 / sampling_rate as u64) as u32
        };
        Self::new(latency_us, channels, SAMPLE_SIZE, sample_count, sampling_rate)
    }

    /// Describe a frame of the given duration
    pub fn from_latency_ms(latency_ms: u32, channels: u8, sampling_rate: u32) -> Self {
        let sample_count = (sampling_rate as u64 * latency_ms as u64 / 1000) as usize;
        Self::new(latency_ms * 1000, channels, SAMPLE_SIZE, sample_count, sampling_rate)
    }

    /// Bytes occupied by one interleaved sample across all channels
    pub fn block_align(&self) -> usize {
        self.sample_size * self.channels as usize
    }

    /// Whether a received frame has the same geometry as this description
    pub fn matches(&self, sample_count: usize, channels: u8, sampling_rate: u32) -> bool {
        self.sample_count == sample_count
            && self.channels == channels
            && self.sampling_rate == sampling_rate
    }
}

impl fmt::Display for VoiceFrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {}ch {} samples ({}us, {} bytes)",
            self.sampling_rate, self.channels, self.sample_count, self.latency_us, self.buffer_size
        )
    }
}

/// Single-slot registry holding the current frame description
///
/// Readers always receive an owned copy; they must fetch a fresh snapshot
/// before sizing each buffer operation.
#[derive(Debug, Default)]
pub struct FrameInfoRegistry {
    slot: Mutex<Option<VoiceFrameInfo>>,
}

impl FrameInfoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new description, replacing the previous one
    pub fn set(&self, info: VoiceFrameInfo) {
        *self.slot.lock() = Some(info);
    }

    pub fn snapshot(&self) -> Option<VoiceFrameInfo> {
        *self.slot.lock()
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frame_geometry() {
        let info = VoiceFrameInfo::from_frame(960, 1, 48000);
        assert_eq!(info.latency_us, 20_000);
        assert_eq!(info.buffer_size, 1920);
        assert_eq!(info.block_align(), 2);
        assert!(info.matches(960, 1, 48000));
        assert!(!info.matches(480, 1, 48000));
    }

    #[test]
    fn test_from_latency() {
        let info = VoiceFrameInfo::from_latency_ms(10, 2, 16000);
        assert_eq!(info.sample_count, 160);
        assert_eq!(info.buffer_size, 640);
        assert_eq!(info.latency_us, 10_000);
    }

    #[test]
    fn test_registry_snapshot_is_a_copy() {
        let registry = FrameInfoRegistry::new();
        assert!(registry.snapshot().is_none());

        registry.set(VoiceFrameInfo::from_frame(480, 1, 48000));
        let snapshot = registry.snapshot().unwrap();

        registry.set(VoiceFrameInfo::from_frame(960, 2, 48000));
        assert_eq!(snapshot.sample_count, 480);
        assert_eq!(registry.snapshot().unwrap().channels, 2);

        registry.clear();
        assert!(!registry.is_set());
    }
}
