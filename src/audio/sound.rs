//! Notification sounds read from 16-bit PCM WAV files

use crate::audio::SampleSpec;
use crate::error::{PhoneError, Result};
use hound::{SampleFormat, WavReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Which notification is playing; reported back in `PlaybackFinish`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoundKind {
    Ring,
    Busy,
    Fail,
    Error,
    Outgoing,
    Test,
}

impl SoundKind {
    pub fn file_name(self) -> &'static str {
        match self {
            SoundKind::Ring => "ring.wav",
            SoundKind::Busy => "busy.wav",
            SoundKind::Fail => "fail.wav",
            SoundKind::Error => "error.wav",
            SoundKind::Outgoing => "outgoing.wav",
            SoundKind::Test => "test.wav",
        }
    }
}

impl fmt::Display for SoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Looping reader over one sound file
pub struct SoundSource {
    kind: SoundKind,
    path: PathBuf,
    reader: WavReader<BufReader<File>>,
    spec: SampleSpec,
    cycles_left: u32,
    finished: bool,
}

impl SoundSource {
    /// Open `dir/<kind file>` for `cycles` repetitions (at least one)
    pub fn open(kind: SoundKind, dir: &Path, cycles: u32) -> Result<Self> {
        let path = dir.join(kind.file_name());
        let shown = path.display().to_string();
        let reader = WavReader::open(&path).map_err(|e| PhoneError::sound(&shown, e))?;

        let wav = reader.spec();
        if wav.sample_format != SampleFormat::Int || wav.bits_per_sample != 16 {
            return Err(PhoneError::sound(
                &shown,
                format!(
                    "unsupported format {:?} {}bit, expected 16bit PCM",
                    wav.sample_format, wav.bits_per_sample
                ),
            ));
        }
        if wav.channels == 0 || wav.channels > 8 {
            return Err(PhoneError::sound(
                &shown,
                format!("unsupported channel count {}", wav.channels),
            ));
        }

        let spec = SampleSpec {
            rate: wav.sample_rate,
            channels: wav.channels as u8,
        };
        debug!("Opened {} ({}, {} samples)", shown, spec, reader.duration());

        Ok(Self {
            kind,
            finished: reader.duration() == 0,
            path,
            reader,
            spec,
            cycles_left: cycles.max(1),
        })
    }

    pub fn kind(&self) -> SoundKind {
        self.kind
    }

    pub fn spec(&self) -> SampleSpec {
        self.spec
    }

    /// All cycles have been read
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Append up to `bytes` of PCM to `out`, rewinding between cycles
    ///
    /// Returns the number of bytes appended; fewer than requested means the
    /// last cycle ended.
    pub fn fill(&mut self, out: &mut Vec<u8>, bytes: usize) -> Result<usize> {
        let block_align = self.spec.channels as usize * 2;
        let target = bytes - bytes % block_align;
        let mut written = 0;

        while written < target && !self.finished {
            let mut exhausted = false;
            {
                let mut samples = self.reader.samples::<i16>();
                while written < target {
                    match samples.next() {
                        Some(Ok(sample)) => {
                            out.extend_from_slice(&sample.to_le_bytes());
                            written += 2;
                        }
                        Some(Err(e)) => {
                            return Err(PhoneError::sound(self.path.display().to_string(), e))
                        }
                        None => {
                            exhausted = true;
                            break;
                        }
                    }
                }
            }

            if exhausted {
                self.cycles_left = self.cycles_left.saturating_sub(1);
                if self.cycles_left == 0 {
                    self.finished = true;
                } else {
                    self.reader
                        .seek(0)
                        .map_err(|e| PhoneError::sound(self.path.display().to_string(), e))?;
                }
            }
        }

        Ok(written)
    }
}

impl fmt::Debug for SoundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundSource")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("cycles_left", &self.cycles_left)
            .finish()
    }
}

/// Write a sine tone WAV, used by tests and the simulated setup
pub fn write_tone(
    path: &Path,
    spec: SampleSpec,
    frequency: f32,
    duration_ms: u32,
) -> std::result::Result<(), hound::Error> {
    let wav_spec = hound::WavSpec {
        channels: spec.channels as u16,
        sample_rate: spec.rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, wav_spec)?;
    let frames = spec.rate as u64 * duration_ms as u64 / 1000;
    for i in 0..frames {
        let t = i as f32 / spec.rate as f32;
        let value = ((t * frequency * std::f32::consts::TAU).sin() * 8000.0) as i16;
        for _ in 0..spec.channels {
            writer.write_sample(value)?;
        }
    }
    writer.finalize()
}
