//! One-shot "does this device need an update" check.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::backend::{OtaBackend, OtaIntent};
use crate::error::{OtaError, Result};
use crate::info::{normalize, OtaInfo};
use crate::state::OtaStateStore;

/// Outcome of the latest update check for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckResult {
    /// No check has run since the device appeared or a rollout started
    #[default]
    Unchecked,
    /// A check request is in flight
    Checking,
    /// Device runs the latest version
    UpToDate,
    /// A newer version is available
    UpdateAvailable,
    /// The check failed; `message` is shown to the user
    CheckFailed { message: String },
}

impl CheckResult {
    /// Verdict for a normalized status record.
    pub fn from_info(info: &OtaInfo) -> Self {
        if info.has_errors() {
            CheckResult::CheckFailed {
                message: info.errors.join("; "),
            }
        } else if info.has_new_version {
            CheckResult::UpdateAvailable
        } else {
            CheckResult::UpToDate
        }
    }
}

/// Validate a device token before any network call.
pub(crate) fn require_token<'a>(device_id: &str, token_verify: Option<&'a str>) -> Result<&'a str> {
    token_verify
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OtaError::MissingToken(device_id.to_string()))
}

/// Runs update checks and records their outcome in the shared store.
#[derive(Clone)]
pub struct UpdateCheckFlow {
    backend: Arc<dyn OtaBackend>,
    store: OtaStateStore,
}

impl UpdateCheckFlow {
    pub fn new(backend: Arc<dyn OtaBackend>, store: OtaStateStore) -> Self {
        Self { backend, store }
    }

    /// Check whether `device_id` has a newer firmware available.
    ///
    /// Only a missing token is an `Err`; backend and protocol failures
    /// become [`CheckResult::CheckFailed`]. When a newer check is issued, or
    /// a rollout is triggered, before this one completes, its result is not
    /// recorded.
    #[instrument(skip_all, fields(device_id = %device_id))]
    pub async fn check(&self, device_id: &str, token_verify: Option<&str>) -> Result<CheckResult> {
        let token = require_token(device_id, token_verify)?;

        let ticket = self.store.next_ticket();
        self.store.update(device_id, |s| {
            s.check_ticket = ticket;
            s.check = CheckResult::Checking;
        });

        debug!("Checking for firmware update");

        let (result, info) = match self.backend.query_ota_info(token, OtaIntent::Check).await {
            Ok(raw) => {
                let info = normalize(&raw);
                (CheckResult::from_info(&info), Some(info))
            }
            Err(e) => {
                warn!(error = %e, "Update check failed");
                (CheckResult::CheckFailed { message: e.to_string() }, None)
            }
        };

        let applied = self.store.update(device_id, |s| {
            if s.check_ticket != ticket {
                return false;
            }
            s.check = result.clone();
            if let Some(info) = info {
                s.info = Some(info);
            }
            true
        });

        if applied {
            info!(result = ?result, "Update check finished");
        } else {
            debug!("Update check superseded, result discarded");
        }

        Ok(result)
    }
}
