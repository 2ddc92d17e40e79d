//! Backend collaborator interfaces and wire types.
//!
//! The dashboard backend exposes one OTA endpoint that serves both status
//! checks and update triggers, told apart only by the `type` field of the
//! request ([`OtaIntent`]). Collaborators depend on that single-endpoint
//! contract, so the flows keep it as is.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OtaError, Result};

/// What an OTA info request asks the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaIntent {
    /// Non-mutating status probe (`type = 0`)
    Check,
    /// Trigger or continue an update (`type = 1`)
    Update,
}

impl OtaIntent {
    /// Value of the `type` field on the wire.
    pub fn wire_type(self) -> u8 {
        match self {
            OtaIntent::Check => 0,
            OtaIntent::Update => 1,
        }
    }
}

/// Body of `POST /ota/check-info-ota`.
#[derive(Debug, Clone, Serialize)]
pub struct OtaInfoRequest<'a> {
    /// The device's `token_verify`
    pub client_id: &'a str,
    #[serde(rename = "type")]
    pub intent: u8,
}

impl<'a> OtaInfoRequest<'a> {
    pub fn new(client_id: &'a str, intent: OtaIntent) -> Self {
        Self {
            client_id,
            intent: intent.wire_type(),
        }
    }
}

/// Standard `{ success, message?, data? }` response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload. `success = false` or a missing `data` is a hard
    /// failure for the call.
    pub fn into_data(self, fallback: &str) -> Result<T> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(OtaError::Rejected(
                self.message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| fallback.to_string()),
            )),
        }
    }
}

/// Device connection state as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Online,
    Offline,
}

/// A device as known to the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable registry id
    pub id: String,
    /// Display name
    pub name: String,
    /// Device type (master, slave, ...)
    pub device_type: String,
    /// Token the backend uses to address the device for OTA
    pub token_verify: Option<String>,
    pub connection_status: ConnectionStatus,
}

impl DeviceIdentity {
    /// The verification token, if present and non-empty.
    pub fn token(&self) -> Option<&str> {
        self.token_verify.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Which board a firmware image is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareTarget {
    Master,
    Slave,
}

impl FirmwareTarget {
    /// Value of the multipart `type` field.
    pub fn form_value(self) -> &'static str {
        match self {
            FirmwareTarget::Master => "0",
            FirmwareTarget::Slave => "1",
        }
    }
}

/// A firmware image to publish through the backend.
#[derive(Debug, Clone)]
pub struct FirmwareUpload {
    pub filename: String,
    pub change_log: String,
    pub version: String,
    pub target: FirmwareTarget,
    pub content: Vec<u8>,
}

/// Response of `POST /ota/upload`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// The backend OTA endpoint.
#[async_trait]
pub trait OtaBackend: Send + Sync {
    /// Query (or, with [`OtaIntent::Update`], trigger) OTA info for a device.
    ///
    /// Returns the raw `data` payload; callers run it through
    /// [`crate::info::normalize`].
    async fn query_ota_info(&self, client_id: &str, intent: OtaIntent) -> Result<Value>;

    /// Upload a new firmware image.
    async fn upload_firmware(&self, upload: FirmwareUpload) -> Result<UploadOutcome>;
}

/// The device registry collaborator.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// List the current user's devices.
    async fn list_devices(&self) -> Result<Vec<DeviceIdentity>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let body = serde_json::to_value(OtaInfoRequest::new("tok-1", OtaIntent::Update)).unwrap();
        assert_eq!(body, json!({"client_id": "tok-1", "type": 1}));

        let body = serde_json::to_value(OtaInfoRequest::new("tok-1", OtaIntent::Check)).unwrap();
        assert_eq!(body["type"], 0);
    }

    #[test]
    fn test_envelope_success() {
        let env: ApiEnvelope<Value> =
            serde_json::from_value(json!({"success": true, "data": {"on_progress": 10}})).unwrap();
        assert_eq!(env.into_data("fallback").unwrap(), json!({"on_progress": 10}));
    }

    #[test]
    fn test_envelope_failures() {
        let env: ApiEnvelope<Value> =
            serde_json::from_value(json!({"success": false, "message": "device offline"})).unwrap();
        match env.into_data("fallback") {
            Err(OtaError::Rejected(msg)) => assert_eq!(msg, "device offline"),
            other => panic!("unexpected: {:?}", other),
        }

        let env: ApiEnvelope<Value> = serde_json::from_value(json!({"success": true})).unwrap();
        match env.into_data("Failed to fetch OTA info") {
            Err(OtaError::Rejected(msg)) => assert_eq!(msg, "Failed to fetch OTA info"),
            other => panic!("unexpected: {:?}", other),
        }

        let env: ApiEnvelope<Value> =
            serde_json::from_value(json!({"success": true, "data": null})).unwrap();
        assert!(env.into_data("x").is_err());
    }

    #[test]
    fn test_identity_token() {
        let mut device = DeviceIdentity {
            id: "1".to_string(),
            name: "Kitchen".to_string(),
            device_type: "master".to_string(),
            token_verify: Some("  ".to_string()),
            connection_status: ConnectionStatus::Online,
        };
        assert!(device.token().is_none());
        device.token_verify = Some("abc".to_string());
        assert_eq!(device.token(), Some("abc"));
    }

    #[test]
    fn test_firmware_target_form_value() {
        assert_eq!(FirmwareTarget::Master.form_value(), "0");
        assert_eq!(FirmwareTarget::Slave.form_value(), "1");
    }
}
