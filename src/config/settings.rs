//! Configuration file support

use crate::audio::{create_default_filter, ManagerConfig, NoiseFilter, SoundCycles, WorkerConfig};
use crate::call::CallConfig;
use crate::config::ConfigError;
use crate::device::{CurrentDevicePolicy, KeywordPolicy, MemoryStore, NoPreference};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loaded from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhoneConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = stderr)
    pub log_file: String,

    pub call: CallSection,
    pub audio: AudioSection,
    pub devices: DevicesSection,
}

/// `[call]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallSection {
    /// Audio bit rate in kbit/s
    pub audio_bitrate: u32,
    pub warmup_frames: u32,
    pub end_cause_timeout_ms: u64,
    pub max_active_interval_ms: u64,
    pub send_retries: u32,
    pub send_retry_sleep_us: u64,
    pub playback_buffer_frames: usize,
}

impl Default for CallSection {
    fn default() -> Self {
        Self {
            audio_bitrate: 48,
            warmup_frames: 10,
            end_cause_timeout_ms: 1000,
            max_active_interval_ms: 50,
            send_retries: 5,
            send_retry_sleep_us: 500,
            playback_buffer_frames: 8,
        }
    }
}

/// `[audio]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioSection {
    pub sample_rate: u32,
    pub channels: u8,
    pub frame_latency_ms: u32,
    pub record_buffer_frames: usize,
    pub filtered_buffer_frames: usize,
    pub level_report_interval_ms: u64,
    /// Directory holding ring.wav, busy.wav, ...
    pub sounds_dir: PathBuf,
    pub ring_cycles: u32,
    pub outgoing_cycles: u32,
    pub busy_cycles: u32,
    pub fail_cycles: u32,
    /// Absolute sample value below which the gate closes
    pub noise_gate_threshold: u16,
    pub preferred_sink_keywords: Vec<String>,
    pub preferred_source_keywords: Vec<String>,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_latency_ms: 20,
            record_buffer_frames: 10,
            filtered_buffer_frames: 10,
            level_report_interval_ms: 200,
            sounds_dir: PathBuf::from("sounds"),
            ring_cycles: 30,
            outgoing_cycles: 30,
            busy_cycles: 3,
            fail_cycles: 2,
            noise_gate_threshold: 300,
            preferred_sink_keywords: Vec::new(),
            preferred_source_keywords: Vec::new(),
        }
    }
}

/// `[devices]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevicesSection {
    /// Persisted default sink name
    pub default_sink: String,
    pub default_source: String,
}

impl PhoneConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. Same directory as executable: deskphone.toml
    /// 2. <config dir>/deskphone/config.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let config_path = exe_dir.join("deskphone.toml");
                if config_path.exists() {
                    return Self::load(&config_path);
                }
            }
        }

        if let Some(config_path) = Self::user_config_path() {
            if config_path.exists() {
                return Self::load(&config_path);
            }
        }

        Ok(Self::default())
    }

    /// Per-user configuration file location
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("deskphone").join("config.toml"))
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    pub fn call_config(&self) -> CallConfig {
        CallConfig {
            audio_bitrate: self.call.audio_bitrate,
            warmup_frames: self.call.warmup_frames,
            end_cause_timeout: Duration::from_millis(self.call.end_cause_timeout_ms),
            max_active_interval: Duration::from_millis(self.call.max_active_interval_ms),
            send_retries: self.call.send_retries.max(1),
            send_retry_sleep: Duration::from_micros(self.call.send_retry_sleep_us),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            filtered_buffer_frames: self.audio.filtered_buffer_frames.max(1),
            level_report_interval: Duration::from_millis(self.audio.level_report_interval_ms),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels.max(1),
            frame_latency_ms: self.audio.frame_latency_ms,
            record_buffer_frames: self.audio.record_buffer_frames.max(1),
            playback_buffer_frames: self.call.playback_buffer_frames.max(1),
            sounds_dir: self.audio.sounds_dir.clone(),
            cycles: SoundCycles {
                ring: self.audio.ring_cycles,
                outgoing: self.audio.outgoing_cycles,
                busy: self.audio.busy_cycles,
                fail: self.audio.fail_cycles,
            },
            worker: self.worker_config(),
        }
    }

    /// Default-device store seeded from `[devices]`
    pub fn device_store(&self) -> MemoryStore {
        MemoryStore::with_defaults(&self.devices.default_sink, &self.devices.default_source)
    }

    /// Keyword policy, or no promotion when no keywords are configured
    pub fn device_policy(&self) -> Box<dyn CurrentDevicePolicy> {
        if self.audio.preferred_sink_keywords.is_empty()
            && self.audio.preferred_source_keywords.is_empty()
        {
            Box::new(NoPreference)
        } else {
            Box::new(KeywordPolicy::new(
                self.audio.preferred_sink_keywords.clone(),
                self.audio.preferred_source_keywords.clone(),
            ))
        }
    }

    pub fn noise_filter(&self) -> Box<dyn NoiseFilter> {
        create_default_filter(self.audio.noise_gate_threshold)
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# Deskphone Configuration

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = stderr)
log_file = ""

[call]
# Audio bit rate requested for calls, kbit/s
audio_bitrate = 48

# Received frames discarded before the remote audio is played
warmup_frames = 10

# Wait for the peer's end cause after a remote hang-up, in milliseconds
end_cause_timeout_ms = 1000

# Upper bound of the call loop interval during a call
max_active_interval_ms = 50

# Attempts per outgoing frame when the signaling library is busy
send_retries = 5
send_retry_sleep_us = 500

# Remote audio buffered before playback, in frames
playback_buffer_frames = 8

[audio]
sample_rate = 48000
channels = 1
frame_latency_ms = 20
record_buffer_frames = 10
filtered_buffer_frames = 10

# Microphone level report spacing during an audio test
level_report_interval_ms = 200

# Directory with ring.wav, busy.wav, fail.wav, error.wav, outgoing.wav, test.wav
sounds_dir = "sounds"

# Repetitions of each notification sound
ring_cycles = 30
outgoing_cycles = 30
busy_cycles = 3
fail_cycles = 2

# Noise gate threshold as absolute sample value (0 keeps the gate open)
noise_gate_threshold = 300

# Devices whose name contains a keyword become current when added
# ("{hostname}" expands to the machine's hostname)
# Example: preferred_sink_keywords = ["usb", "{hostname}"]
preferred_sink_keywords = []
preferred_source_keywords = []

[devices]
# Persisted default devices (empty = none)
default_sink = ""
default_source = ""
"#
        .to_string()
    }
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: String::new(),
            call: CallSection::default(),
            audio: AudioSection::default(),
            devices: DevicesSection::default(),
        }
    }
}
