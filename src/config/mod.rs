//! Configuration module

mod args;
mod settings;

pub use args::{Args, Command};
pub use settings::{AudioSection, CallSection, DevicesSection, PhoneConfig};

use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to access config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// Error serializing config
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
