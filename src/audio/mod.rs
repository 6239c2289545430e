//! Audio transport: ring buffers, framing, noise filtering and managed streams

mod buffer;
mod filter;
mod frame_info;
mod hardware;
mod manager;
mod sound;
mod stream;
mod volume;
mod worker;

pub use buffer::{BufferUsage, RingBuffer};
pub use filter::{create_default_filter, Bypass, NoiseFilter, NoiseGate};
pub use frame_info::{FrameInfoRegistry, VoiceFrameInfo, SAMPLE_SIZE};
pub use hardware::{
    AudioHardware, BufferAttrs, EventHandler, HardwareDevice, HardwareError, HardwareEvent,
    SampleSpec, StreamId, StreamKind, StreamMetadata,
};
pub use manager::{AudioDeviceManager, ManagerConfig, SoundCycles};
pub use sound::{write_tone, SoundKind, SoundSource};
pub use stream::{ManagedStream, StreamInfoState, StreamPath, StreamPhase, WriteOutcome};
pub use volume::{to_percent, ChannelVolumes};
pub use worker::{chunk_size, NoiseFilterWorker, WorkerConfig, WorkerSignal};

use std::sync::Arc;

/// The ring buffers and frame registry shared by the voice path
///
/// - `playback`: received call audio, drained by the voice stream
/// - `captured`: microphone audio, drained by the noise filter worker
/// - `filtered`: filtered microphone audio, drained by the call loop
#[derive(Debug, Clone, Default)]
pub struct VoiceBuffers {
    pub playback: Arc<RingBuffer>,
    pub captured: Arc<RingBuffer>,
    pub filtered: Arc<RingBuffer>,
    pub frame_info: Arc<FrameInfoRegistry>,
}

impl VoiceBuffers {
    pub fn new() -> Self {
        Self::default()
    }
}
