//! Configuration for the OTA server.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::Args;

/// Default location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/iotdash/ota-server.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for the HTTP server
    pub listen_address: String,
    /// Base URL put in download links; derived from the request's `Host`
    /// header when unset
    pub public_url: Option<String>,
    /// Directory holding the firmware images
    pub firmware_dir: PathBuf,
    /// Version offered to devices
    pub latest_version: String,
    /// Known releases, keyed by version
    pub versions: BTreeMap<String, FirmwareRelease>,
}

/// One published firmware release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareRelease {
    /// Image file name inside `firmware_dir`
    pub filename: String,
    #[serde(default)]
    pub changelog: String,
    #[serde(default)]
    pub release_date: String,
}

impl FirmwareRelease {
    fn new(filename: &str, changelog: &str, release_date: &str) -> Self {
        Self {
            filename: filename.to_string(),
            changelog: changelog.to_string(),
            release_date: release_date.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(
            "1.0.0".to_string(),
            FirmwareRelease::new("firmware_v1.0.0.bin", "Initial release", "2024-01-01"),
        );
        versions.insert(
            "1.0.1".to_string(),
            FirmwareRelease::new(
                "firmware_v1.0.1.bin",
                "Bug fixes and performance improvements",
                "2024-01-15",
            ),
        );
        versions.insert(
            "1.1.0".to_string(),
            FirmwareRelease::new(
                "firmware_v1.1.0.bin",
                "New features: OTA update, MQTT improvements",
                "2024-02-01",
            ),
        );

        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            public_url: None,
            firmware_dir: PathBuf::from("firmware"),
            latest_version: "1.1.0".to_string(),
            versions,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Build a configuration from defaults and CLI arguments only.
    pub fn default_with_cli(args: &Args) -> Self {
        Self::default().with_cli_overrides(args)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref listen) = args.listen {
            self.listen_address = listen.clone();
        }

        if let Some(ref public_url) = args.public_url {
            self.public_url = Some(public_url.clone());
        }

        if let Some(ref firmware_dir) = args.firmware_dir {
            self.firmware_dir = PathBuf::from(firmware_dir);
        }

        self
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_address
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen_address))
    }

    /// The release currently offered to devices.
    pub fn latest_release(&self) -> Option<&FirmwareRelease> {
        self.versions.get(&self.latest_version)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if self.latest_release().is_none() {
            bail!(
                "Latest version '{}' is not listed under versions",
                self.latest_version
            );
        }

        for (version, release) in &self.versions {
            if !is_plain_file_name(&release.filename) {
                bail!(
                    "Firmware file name '{}' for version {} must not contain path separators",
                    release.filename,
                    version
                );
            }
        }

        Ok(())
    }
}

/// A bare file name: non-empty, no separators, no parent references.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}
