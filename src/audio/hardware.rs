//! Interface to the audio hardware subsystem
//!
//! The subsystem owns its own thread and reports everything asynchronously
//! through [`HardwareEvent`]s delivered to the handler registered with
//! [`AudioHardware::subscribe`]. API calls must never invoke the handler
//! synchronously; events are always delivered from the hardware thread.

use crate::device::DeviceType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque identifier of an open hardware stream
pub type StreamId = u32;

/// Role of a managed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Notification sounds
    Playback,
    /// Remote party audio
    Voice,
    /// Microphone capture
    Record,
}

impl StreamKind {
    /// Device type the stream attaches to
    pub fn device_type(self) -> DeviceType {
        match self {
            StreamKind::Playback | StreamKind::Voice => DeviceType::Sink,
            StreamKind::Record => DeviceType::Source,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Playback => write!(f, "playback"),
            StreamKind::Voice => write!(f, "voice"),
            StreamKind::Record => write!(f, "record"),
        }
    }
}

/// PCM sample format (always signed 16-bit little endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    pub rate: u32,
    pub channels: u8,
}

impl SampleSpec {
    /// Bytes for the given duration, aligned to whole samples
    pub fn bytes_for_us(&self, us: u64) -> usize {
        let frames = self.rate as u64 * us / 1_000_000;
        frames as usize * self.channels as usize * 2
    }
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s16le {}Hz {}ch", self.rate, self.channels)
    }
}

/// Server-side buffering requested for a stream, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAttrs {
    pub max_length: u32,
    pub target_length: u32,
    pub prebuf: u32,
    pub min_request: u32,
    pub fragment_size: u32,
}

impl BufferAttrs {
    /// Attributes for a stream moving `fragment` bytes per callback
    pub fn for_fragment(fragment: usize) -> Self {
        let fragment = fragment as u32;
        Self {
            max_length: fragment * 8,
            target_length: fragment * 2,
            prebuf: fragment,
            min_request: fragment,
            fragment_size: fragment,
        }
    }
}

/// Stream parameters reported by the hardware once a stream is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMetadata {
    pub device_index: u32,
    pub volume: u32,
    pub volume_steps: u32,
    pub channels: u8,
    pub has_volume: bool,
    pub volume_writable: bool,
}

/// Physical device as enumerated by the hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareDevice {
    pub card_index: u32,
    pub kind: DeviceType,
    pub index: u32,
    /// Stable key, survives re-enumeration
    pub name: String,
    pub description: String,
    pub channels: u8,
    pub base_volume: u32,
    pub volume: u32,
    pub volume_steps: u32,
}

/// Callback from the hardware thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    DeviceAdded(HardwareDevice),
    DeviceRemoved { kind: DeviceType, index: u32 },
    /// Every device of a card disappeared
    CardRemoved { card_index: u32 },
    /// Hardware-side volume change
    DeviceVolumeChanged { kind: DeviceType, index: u32, volume: u32 },
    StreamReady(StreamId),
    /// Stream volume or device moved
    StreamChanged(StreamId),
    StreamWriteReady { stream: StreamId, bytes: usize },
    StreamReadReady { stream: StreamId, bytes: usize },
    StreamOverflow(StreamId),
    StreamUnderflow(StreamId),
    /// All written data has been played after a drain request
    StreamDrained(StreamId),
    StreamTerminated(StreamId),
    StreamFailed { stream: StreamId, reason: String },
}

/// Handler receiving hardware events
pub type EventHandler = Arc<dyn Fn(HardwareEvent) + Send + Sync>;

/// Hardware subsystem errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// Subsystem could not be initialized
    #[error("Audio subsystem unavailable: {0}")]
    Unavailable(String),

    /// Stream could not be created or connected
    #[error("Failed to connect {kind} stream: {message}")]
    Connect { kind: StreamKind, message: String },

    /// Stream id unknown to the hardware
    #[error("Unknown stream {0}")]
    UnknownStream(StreamId),

    /// Device index unknown to the hardware
    #[error("Unknown {kind} device #{index}")]
    UnknownDevice { kind: DeviceType, index: u32 },

    /// Read or write on a stream failed
    #[error("Stream {stream} I/O error: {message}")]
    Io { stream: StreamId, message: String },
}

/// Audio hardware subsystem
pub trait AudioHardware: Send + Sync {
    /// Register the event handler. Called once before any stream is opened.
    fn subscribe(&self, handler: EventHandler);

    fn enumerate_devices(&self) -> Result<Vec<HardwareDevice>, HardwareError>;

    /// Create a stream on the named device (`None` = server default)
    ///
    /// The stream is usable once `StreamReady` arrives.
    fn open_stream(
        &self,
        kind: StreamKind,
        device: Option<&str>,
        spec: SampleSpec,
        attrs: BufferAttrs,
    ) -> Result<StreamId, HardwareError>;

    /// Queue data on a playback-direction stream
    fn write(&self, stream: StreamId, data: &[u8]) -> Result<(), HardwareError>;

    /// Append all currently captured data to `out`, returning the byte count
    fn read(&self, stream: StreamId, out: &mut Vec<u8>) -> Result<usize, HardwareError>;

    /// Request `StreamDrained` once queued data has played
    fn drain(&self, stream: StreamId) -> Result<(), HardwareError>;

    fn disconnect(&self, stream: StreamId) -> Result<(), HardwareError>;

    fn stream_metadata(&self, stream: StreamId) -> Result<StreamMetadata, HardwareError>;

    fn set_stream_volume(&self, stream: StreamId, volume: u32) -> Result<(), HardwareError>;

    /// Apply one volume to every channel of a device
    fn set_device_volume(
        &self,
        kind: DeviceType,
        index: u32,
        channels: u8,
        volume: u32,
    ) -> Result<(), HardwareError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_spec_sizes() {
        let spec = SampleSpec {
            rate: 48000,
            channels: 2,
        };
        assert_eq!(spec.bytes_for_us(10_000), 1920);
    }

    #[test]
    fn test_stream_device_type() {
        assert_eq!(StreamKind::Voice.device_type(), DeviceType::Sink);
        assert_eq!(StreamKind::Record.device_type(), DeviceType::Source);
    }

    #[test]
    fn test_buffer_attrs_for_fragment() {
        let attrs = BufferAttrs::for_fragment(1920);
        assert_eq!(attrs.fragment_size, 1920);
        assert_eq!(attrs.target_length, 3840);
        assert_eq!(attrs.max_length, 15360);
    }
}
