//! Command-line argument parsing.

use clap::Parser;

/// iotdash OTA server - serves firmware images to devices
#[derive(Parser, Debug)]
#[command(name = "iotdash-ota-server")]
#[command(about = "iotdash OTA server - serves firmware images to devices")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Listen address for the HTTP server
    #[arg(long)]
    pub listen: Option<String>,

    /// Base URL devices use to reach this server (used in download links)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Directory holding the firmware images
    #[arg(long)]
    pub firmware_dir: Option<String>,
}
