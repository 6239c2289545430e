//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// deskphone - desk telephone for a peer-to-peer call network
///
/// Bridges calls to local speakers and microphones
#[derive(Parser, Debug)]
#[command(name = "deskphone")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,

    /// Configuration file (default: deskphone.toml next to the executable)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// List audio devices
    Devices,

    /// Run the phone on the simulated backends
    Run {
        /// Call this peer after startup
        #[arg(long)]
        call: Option<u32>,

        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Test the local audio path
    Test {
        /// Play the test sound (with --record: loop the microphone back)
        #[arg(long)]
        playback: bool,

        /// Record from the microphone and report levels
        #[arg(long)]
        record: bool,

        /// Test duration in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },

    /// Print an annotated sample configuration
    SampleConfig,
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    ///
    /// `None` when no flag was given, so the configured level applies.
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.quiet {
            Some(tracing::Level::ERROR)
        } else {
            match self.verbose {
                0 => None,
                1 => Some(tracing::Level::DEBUG),
                _ => Some(tracing::Level::TRACE),
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Run {
            call: None,
            seconds: None,
        }
    }
}
