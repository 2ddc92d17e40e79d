//! Backend connection configuration
//!
//! Embedded in the dashboard's YAML config file under the `backend` section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OtaError, Result};

/// Connect timeout for backend requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Dashboard backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the dashboard backend API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token for the current user session
    #[serde(default)]
    pub access_token: Option<String>,

    /// Overall timeout for a single request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(OtaError::InvalidConfig("Backend base URL cannot be empty".to_string()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(OtaError::InvalidConfig(format!(
                "Backend base URL '{}' must start with http:// or https://",
                url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(OtaError::InvalidConfig("Request timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }
}
