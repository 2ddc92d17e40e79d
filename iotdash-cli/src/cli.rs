//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use iotdash_ota::FirmwareTarget;

/// iotdash - OTA firmware updates for your devices
#[derive(Parser, Debug)]
#[command(name = "iotdash")]
#[command(about = "iotdash - OTA firmware updates for your devices")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Enable development mode (in-memory demo backend)
    #[arg(long, global = true)]
    pub dev: bool,

    /// Dashboard backend base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Session access token
    #[arg(long, env = "IOTDASH_ACCESS_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List devices with their firmware status
    Devices,

    /// Check whether a device has a newer firmware available
    Check {
        /// Device id
        device_id: String,
    },

    /// Roll out the latest firmware to a device
    Update {
        /// Device id
        device_id: String,

        /// Return once the update is acknowledged instead of following it
        #[arg(long)]
        no_watch: bool,

        /// Give up following the update after this many seconds
        #[arg(long, default_value = "600")]
        timeout_secs: u64,
    },

    /// Publish a new firmware image
    Upload {
        /// Firmware image file
        #[arg(short, long)]
        file: PathBuf,

        /// Firmware version
        #[arg(short, long)]
        version: String,

        /// Release notes
        #[arg(long, default_value = "")]
        changelog: String,

        /// Board the image is built for
        #[arg(long, value_enum, default_value = "master")]
        target: TargetArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetArg {
    Master,
    Slave,
}

impl From<TargetArg> for FirmwareTarget {
    fn from(target: TargetArg) -> Self {
        match target {
            TargetArg::Master => FirmwareTarget::Master,
            TargetArg::Slave => FirmwareTarget::Slave,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update() {
        let args = Args::parse_from(["iotdash", "--dev", "update", "42", "--no-watch"]);
        assert!(args.dev);
        match args.command {
            Command::Update { device_id, no_watch, timeout_secs } => {
                assert_eq!(device_id, "42");
                assert!(no_watch);
                assert_eq!(timeout_secs, 600);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_upload() {
        let args = Args::parse_from([
            "iotdash", "upload", "--file", "fw.bin", "--version", "1.2.0", "--target", "slave",
        ]);
        match args.command {
            Command::Upload { file, version, target, changelog } => {
                assert_eq!(file, PathBuf::from("fw.bin"));
                assert_eq!(version, "1.2.0");
                assert_eq!(FirmwareTarget::from(target), FirmwareTarget::Slave);
                assert!(changelog.is_empty());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["iotdash", "devices", "--api-url", "http://api.local"]);
        assert_eq!(args.api_url.as_deref(), Some("http://api.local"));
    }
}
