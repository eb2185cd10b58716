//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::factory::DriverKind;

/// Run command arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Save a snapshot every N seconds (overrides capture.snapshot_every_secs)
    #[arg(long, value_name = "SECS")]
    pub snapshot_every: Option<u64>,

    /// Stop after this many frames instead of waiting for Ctrl-C
    #[arg(long, value_name = "N")]
    pub max_frames: Option<u64>,
}

/// Check command arguments.
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Frames to read (defaults to capture.check_frames)
    #[arg(short = 'n', long, value_name = "N")]
    pub frames: Option<u32>,

    /// Write the still to this file (.jpg, .png or .bmp)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Output the report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Capture command arguments.
#[derive(Debug, Args)]
pub struct CaptureCommand {
    /// Output file; defaults to a timestamped file in the snapshot directory
    pub path: Option<PathBuf>,

    /// Skip the configured rotation, flips and ROI
    #[arg(long)]
    pub raw: bool,
}

/// Capabilities command arguments.
#[derive(Debug, Args)]
pub struct CapabilitiesCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        file: Option<PathBuf>,
    },
}

/// Driver argument for `--driver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DriverArg {
    /// Synthetic test pattern
    Mock,
    /// Video4Linux2 device
    V4l2,
}

impl From<DriverArg> for DriverKind {
    fn from(arg: DriverArg) -> Self {
        match arg {
            DriverArg::Mock => Self::Mock,
            DriverArg::V4l2 => Self::V4l2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_arg_conversion() {
        assert_eq!(DriverKind::from(DriverArg::Mock), DriverKind::Mock);
        assert_eq!(DriverKind::from(DriverArg::V4l2), DriverKind::V4l2);
    }

    #[test]
    fn test_driver_arg_value_names() {
        let names: Vec<_> = DriverArg::value_variants()
            .iter()
            .filter_map(|v| v.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, ["mock", "v4l2"]);
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
