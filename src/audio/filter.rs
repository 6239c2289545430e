//! Pluggable noise filtering for captured microphone audio

/// In-place filter over interleaved 16-bit PCM
///
/// Implementations keep their own state between calls and are driven from
/// the noise filter worker thread only.
pub trait NoiseFilter: Send + 'static {
    /// Filter `samples` in place. `channels` is the interleave factor.
    fn process(&mut self, samples: &mut [i16], channels: usize);

    /// Forget all accumulated state (called when the capture path restarts)
    fn reset(&mut self);
}

/// Pass-through filter
#[derive(Debug, Default)]
pub struct Bypass;

impl NoiseFilter for Bypass {
    fn process(&mut self, _samples: &mut [i16], _channels: usize) {}

    fn reset(&mut self) {}
}

/// DC-blocking high-pass stage followed by a downward noise gate
///
/// Below `threshold` the gain ramps toward `floor_gain`; above it the gain
/// recovers quickly so speech onsets are preserved.
#[derive(Debug)]
pub struct NoiseGate {
    threshold: f32,
    floor_gain: f32,
    attack: f32,
    release: f32,
    pole: f32,
    channels: Vec<ChannelState>,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    prev_in: f32,
    prev_out: f32,
    envelope: f32,
    gain: f32,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            prev_in: 0.0,
            prev_out: 0.0,
            envelope: 0.0,
            gain: 1.0,
        }
    }
}

impl NoiseGate {
    /// Create a gate that closes below `threshold` (absolute sample value)
    pub fn new(threshold: u16) -> Self {
        Self {
            threshold: threshold as f32,
            floor_gain: 0.1,
            attack: 0.5,
            release: 0.002,
            pole: 0.995,
            channels: Vec::new(),
        }
    }

    /// Gain applied while the gate is closed (0.0 - 1.0)
    pub fn with_floor_gain(mut self, gain: f32) -> Self {
        self.floor_gain = gain.clamp(0.0, 1.0);
        self
    }
}

impl Default for NoiseGate {
    fn default() -> Self {
        Self::new(300)
    }
}

impl NoiseFilter for NoiseGate {
    fn process(&mut self, samples: &mut [i16], channels: usize) {
        let channels = channels.max(1);
        if self.channels.len() != channels {
            self.channels = vec![ChannelState::default(); channels];
        }

        for frame in samples.chunks_mut(channels) {
            for (sample, state) in frame.iter_mut().zip(self.channels.iter_mut()) {
                let input = *sample as f32;
                let filtered = input - state.prev_in + self.pole * state.prev_out;
                state.prev_in = input;
                state.prev_out = filtered;

                let level = filtered.abs();
                let follow = if level > state.envelope { 0.1 } else { 0.001 };
                state.envelope += (level - state.envelope) * follow;

                let target = if state.envelope >= self.threshold {
                    1.0
                } else {
                    self.floor_gain
                };
                let rate = if target > state.gain { self.attack } else { self.release };
                state.gain += (target - state.gain) * rate;

                *sample = (filtered * state.gain)
                    .round()
                    .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
        }
    }

    fn reset(&mut self) {
        self.channels.clear();
    }
}

/// Create the default noise filter
pub fn create_default_filter(threshold: u16) -> Box<dyn NoiseFilter> {
    Box::new(NoiseGate::new(threshold))
}
