//! Command-line interface for platecam.
//!
//! This module provides the CLI structure for the `platecam` binary. The
//! handlers live in `main.rs`.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CapabilitiesCommand, CaptureCommand, CheckCommand, ConfigCommand, DriverArg, RunCommand,
};

use crate::config::Config;
use crate::logging::Verbosity;

/// platecam - Camera acquisition for plate recognition
///
/// Opens the configured camera, streams frames and saves snapshots.
#[derive(Debug, Parser)]
#[command(name = "platecam")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Override the configured camera driver
    #[arg(long, global = true, value_enum)]
    pub driver: Option<DriverArg>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream from the camera until interrupted
    Run(RunCommand),

    /// Smoke-test the camera: stream, measure FPS, grab a still
    Check(CheckCommand),

    /// Capture a single still
    Capture(CaptureCommand),

    /// Show what the camera supports
    Capabilities(CapabilitiesCommand),

    /// List the camera drivers in this build
    Drivers,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }

    /// Apply command-line overrides to a loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(driver) = self.driver {
            config.camera.driver = driver.into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::DriverKind;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "platecam");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(parse(&["platecam", "-q", "drivers"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["platecam", "drivers"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["platecam", "-v", "drivers"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["platecam", "-vvv", "drivers"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_run() {
        let cli = parse(&["platecam", "run", "--snapshot-every", "10"]);
        match cli.command {
            Command::Run(cmd) => {
                assert_eq!(cmd.snapshot_every, Some(10));
                assert!(cmd.max_frames.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_check() {
        let cli = parse(&["platecam", "check", "-n", "5", "--output", "/tmp/still.jpg"]);
        match cli.command {
            Command::Check(cmd) => {
                assert_eq!(cmd.frames, Some(5));
                assert_eq!(cmd.output, Some(PathBuf::from("/tmp/still.jpg")));
                assert!(!cmd.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_capture_positional_path() {
        let cli = parse(&["platecam", "capture", "out.png", "--raw"]);
        match cli.command {
            Command::Capture(cmd) => {
                assert_eq!(cmd.path, Some(PathBuf::from("out.png")));
                assert!(cmd.raw);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_validate_file() {
        let cli = parse(&["platecam", "config", "validate", "/etc/platecam.toml"]);
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = parse(&["platecam", "capabilities", "--json", "-c", "/custom.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom.toml")));
        assert!(matches!(
            cli.command,
            Command::Capabilities(CapabilitiesCommand { json: true })
        ));
    }

    #[test]
    fn test_driver_override() {
        let cli = parse(&["platecam", "--driver", "mock", "check"]);
        let mut config = Config::default();
        assert_eq!(config.camera.driver, DriverKind::V4l2);

        cli.apply_overrides(&mut config);
        assert_eq!(config.camera.driver, DriverKind::Mock);
    }

    #[test]
    fn test_no_driver_override_keeps_config() {
        let cli = parse(&["platecam", "drivers"]);
        let mut config = Config::default();
        config.camera.driver = DriverKind::Mock;

        cli.apply_overrides(&mut config);
        assert_eq!(config.camera.driver, DriverKind::Mock);
    }

    #[test]
    fn test_rejects_unknown_driver() {
        assert!(Cli::try_parse_from(["platecam", "--driver", "opencv", "check"]).is_err());
    }
}
