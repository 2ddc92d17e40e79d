//! Error types for OTA coordination.

use thiserror::Error;

/// Errors that can occur while checking or rolling out firmware updates.
#[derive(Error, Debug)]
pub enum OtaError {
    /// The device has no verification token, so the backend cannot address it.
    #[error("Device {0} has no verification token")]
    MissingToken(String),

    /// A rollout is already triggering or in progress for this device.
    #[error("Rollout already in flight for device {0}")]
    RolloutInFlight(String),

    /// The device is not part of the current device list.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Transport-level failure talking to the backend (connect, timeout, decode).
    #[error("Backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered but refused the request or sent no data.
    #[error("Backend rejected request: {0}")]
    Rejected(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OtaError {
    /// Whether this error was raised before any network call was made.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            OtaError::MissingToken(_) | OtaError::RolloutInFlight(_) | OtaError::UnknownDevice(_)
        )
    }
}

/// Result type alias for OTA operations.
pub type Result<T> = std::result::Result<T, OtaError>;
