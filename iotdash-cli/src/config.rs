//! Configuration management for the CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use iotdash_ota::BackendConfig;

use crate::cli::Args;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dashboard backend connection
    pub backend: BackendConfig,
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

    /// `~/.config/iotdash/config.yaml`, when a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/iotdash/config.yaml"))
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref api_url) = args.api_url {
            self.backend.base_url = api_url.clone();
        }

        if let Some(ref token) = args.token {
            self.backend.access_token = Some(token.clone());
        }

        self
    }
}
