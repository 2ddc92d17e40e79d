//! HTTP client for the dashboard backend.
//!
//! Implements [`OtaBackend`] and [`DeviceRegistry`] over the backend's REST
//! API. Every request carries the session's bearer token when one is
//! configured.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    ApiEnvelope, ConnectionStatus, DeviceIdentity, DeviceRegistry, FirmwareUpload, OtaBackend,
    OtaInfoRequest, OtaIntent, UploadOutcome,
};
use crate::config::{BackendConfig, CONNECT_TIMEOUT};
use crate::error::{OtaError, Result};

const OTA_INFO_PATH: &str = "/ota/check-info-ota";
const DEVICES_PATH: &str = "/devices/getDevices";
const UPLOAD_PATH: &str = "/ota/upload";

/// Dashboard backend reached over HTTP.
pub struct HttpBackend {
    base_url: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            access_token: config
                .access_token
                .clone()
                .filter(|t| !t.trim().is_empty()),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Decode a JSON body, turning non-2xx answers into [`OtaError::Rejected`]
/// with the server's `detail` or `message` when it sent one.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = ["detail", "message"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status));
        return Err(OtaError::Rejected(message));
    }

    Ok(response.json().await?)
}

#[async_trait]
impl OtaBackend for HttpBackend {
    #[instrument(skip_all, fields(intent = ?intent))]
    async fn query_ota_info(&self, client_id: &str, intent: OtaIntent) -> Result<Value> {
        let response = self
            .authorized(self.client.post(self.url(OTA_INFO_PATH)))
            .json(&OtaInfoRequest::new(client_id, intent))
            .send()
            .await?;

        let envelope: ApiEnvelope<Value> = read_json(response).await?;
        envelope.into_data("Failed to fetch OTA info")
    }

    #[instrument(skip_all, fields(filename = %upload.filename, version = %upload.version))]
    async fn upload_firmware(&self, upload: FirmwareUpload) -> Result<UploadOutcome> {
        let size = upload.content.len();
        let file = Part::bytes(upload.content)
            .file_name(upload.filename.clone())
            .mime_str("application/octet-stream")?;

        let form = Form::new()
            .part("file", file)
            .text("filename", upload.filename)
            .text("change_log", upload.change_log)
            .text("version", upload.version)
            .text("type", upload.target.form_value());

        info!(size, "Uploading firmware");

        let response = self
            .authorized(self.client.post(self.url(UPLOAD_PATH)))
            .multipart(form)
            .send()
            .await?;

        let outcome: UploadOutcome = read_json(response).await?;
        if !outcome.success {
            warn!(message = ?outcome.message, "Backend refused firmware");
        }
        Ok(outcome)
    }
}

/// `GET /devices/getDevices` response body.
#[derive(Debug, Deserialize)]
struct DeviceListResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    devices: Option<Vec<RawDevice>>,
}

/// A device as the registry sends it. `id` may be a number or a string.
#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    device_type: Option<String>,
    #[serde(default)]
    token_verify: Option<String>,
    #[serde(default)]
    connection_status: Option<String>,
    #[serde(default)]
    is_active: Option<bool>,
}

impl RawDevice {
    /// `None` for entries without a usable id.
    fn into_identity(self) -> Option<DeviceIdentity> {
        let id = match self.id {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        let connection_status = match self.connection_status.as_deref().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("online") => ConnectionStatus::Online,
            Some(s) if s.eq_ignore_ascii_case("offline") => ConnectionStatus::Offline,
            _ if self.is_active.unwrap_or(false) => ConnectionStatus::Online,
            _ => ConnectionStatus::Offline,
        };

        Some(DeviceIdentity {
            name: self.device_name.unwrap_or_else(|| id.clone()),
            id,
            device_type: self.device_type.unwrap_or_default(),
            token_verify: self.token_verify,
            connection_status,
        })
    }
}

#[async_trait]
impl DeviceRegistry for HttpBackend {
    #[instrument(skip(self))]
    async fn list_devices(&self) -> Result<Vec<DeviceIdentity>> {
        let response = self
            .authorized(self.client.get(self.url(DEVICES_PATH)))
            .send()
            .await?;

        let body: DeviceListResponse = read_json(response).await?;
        if !body.success {
            return Err(OtaError::Rejected(
                body.message.unwrap_or_else(|| "Failed to fetch devices".to_string()),
            ));
        }

        let raw = body.devices.unwrap_or_default();
        let total = raw.len();
        let devices: Vec<DeviceIdentity> = raw.into_iter().filter_map(RawDevice::into_identity).collect();
        if devices.len() != total {
            warn!(skipped = total - devices.len(), "Skipped devices without an id");
        }

        debug!(count = devices.len(), "Device list fetched");
        Ok(devices)
    }
}
