//! In-memory backend for tests and offline demos.
//!
//! Responses are scripted per `(token, intent)`. Each call takes the next
//! scripted response; the last one is sticky and answers every further call.
//! Unscripted calls answer with an empty payload.
//!
//! A rollout script ([`MockBackend::script_rollout`]) replaces a device's
//! check responses once an update is triggered for it, so status checks
//! before the update do not consume progress frames.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::backend::{
    ConnectionStatus, DeviceIdentity, DeviceRegistry, FirmwareUpload, OtaBackend, OtaIntent,
    UploadOutcome,
};
use crate::error::{OtaError, Result};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return this payload
    Payload(Value),
    /// Fail the call with this message
    Fail(String),
    /// Wait, then answer with the inner response
    Delayed(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn delayed(delay: Duration, response: MockResponse) -> Self {
        MockResponse::Delayed(delay, Box::new(response))
    }
}

type ScriptKey = (String, u8);

/// Mock OTA backend and device registry.
pub struct MockBackend {
    devices: RwLock<Vec<DeviceIdentity>>,
    scripts: Mutex<HashMap<ScriptKey, VecDeque<MockResponse>>>,
    rollouts: Mutex<HashMap<String, Vec<MockResponse>>>,
    calls: Mutex<Vec<(String, OtaIntent)>>,
    list_calls: Mutex<usize>,
    uploads: Mutex<Vec<FirmwareUpload>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            rollouts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            list_calls: Mutex::new(0),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_devices(devices: Vec<DeviceIdentity>) -> Self {
        let mock = Self::new();
        mock.set_devices(devices);
        mock
    }

    /// Two devices, one of which walks through a full update when triggered.
    ///
    /// Used by the CLI's `--dev` mode.
    pub fn demo() -> Self {
        let mock = Self::with_devices(vec![
            demo_device("1", "Gateway", "master", Some("demo-gateway"), ConnectionStatus::Online),
            demo_device("2", "Sensor hub", "slave", Some("demo-hub"), ConnectionStatus::Offline),
        ]);

        mock.push_response(
            "demo-gateway",
            OtaIntent::Check,
            json!({"currentVersion": "1.0.0", "lastVersion": "1.1.0", "hasNewVersion": true}),
        );
        mock.push_response("demo-gateway", OtaIntent::Update, json!({"is_updating": true, "on_progress": 0}));
        let mut frames: Vec<Value> = [20, 45, 70, 95]
            .into_iter()
            .map(|progress| json!({"is_updating": true, "on_progress": progress, "currentVersion": "1.0.0"}))
            .collect();
        frames.push(json!({
            "is_updating": false,
            "currentVersion": "1.1.0",
            "lastVersion": "1.1.0",
            "hasNewVersion": false,
        }));
        mock.script_rollout("demo-gateway", frames);

        mock.push_response(
            "demo-hub",
            OtaIntent::Check,
            json!({"currentVersion": "1.1.0", "lastVersion": "1.1.0", "hasNewVersion": false}),
        );
        mock.push_response("demo-hub", OtaIntent::Update, json!({"error": ["Device is offline"]}));

        mock
    }

    pub fn set_devices(&self, devices: Vec<DeviceIdentity>) {
        *self.devices.write().unwrap_or_else(PoisonError::into_inner) = devices;
    }

    /// Append a scripted response for `(token, intent)`.
    pub fn push(&self, token: &str, intent: OtaIntent, response: MockResponse) {
        lock(&self.scripts)
            .entry((token.to_string(), intent.wire_type()))
            .or_default()
            .push_back(response);
    }

    pub fn push_response(&self, token: &str, intent: OtaIntent, payload: Value) {
        self.push(token, intent, MockResponse::Payload(payload));
    }

    pub fn push_failure(&self, token: &str, intent: OtaIntent, message: &str) {
        self.push(token, intent, MockResponse::Fail(message.to_string()));
    }

    /// Drop whatever is scripted for `(token, intent)`, including a sticky
    /// last response.
    pub fn clear_script(&self, token: &str, intent: OtaIntent) {
        lock(&self.scripts).remove(&(token.to_string(), intent.wire_type()));
    }

    /// Check responses that take over once an update is triggered for `token`.
    pub fn script_rollout(&self, token: &str, frames: Vec<Value>) {
        lock(&self.rollouts).insert(
            token.to_string(),
            frames.into_iter().map(MockResponse::Payload).collect(),
        );
    }

    /// Every OTA info call so far, in call order.
    pub fn calls(&self) -> Vec<(String, OtaIntent)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, token: &str, intent: OtaIntent) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|(t, i)| t == token && *i == intent)
            .count()
    }

    pub fn list_calls(&self) -> usize {
        *lock(&self.list_calls)
    }

    pub fn uploads(&self) -> Vec<FirmwareUpload> {
        lock(&self.uploads).clone()
    }

    fn next_response(&self, token: &str, intent: OtaIntent) -> MockResponse {
        let mut scripts = lock(&self.scripts);
        match scripts.get_mut(&(token.to_string(), intent.wire_type())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| MockResponse::Payload(json!({}))),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| MockResponse::Payload(json!({}))),
            None => MockResponse::Payload(json!({})),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn demo_device(
    id: &str,
    name: &str,
    device_type: &str,
    token: Option<&str>,
    connection_status: ConnectionStatus,
) -> DeviceIdentity {
    DeviceIdentity {
        id: id.to_string(),
        name: name.to_string(),
        device_type: device_type.to_string(),
        token_verify: token.map(str::to_string),
        connection_status,
    }
}

#[async_trait]
impl OtaBackend for MockBackend {
    #[instrument(skip(self), level = "debug")]
    async fn query_ota_info(&self, client_id: &str, intent: OtaIntent) -> Result<Value> {
        lock(&self.calls).push((client_id.to_string(), intent));

        if intent == OtaIntent::Update {
            if let Some(frames) = lock(&self.rollouts).get(client_id) {
                lock(&self.scripts).insert(
                    (client_id.to_string(), OtaIntent::Check.wire_type()),
                    frames.iter().cloned().collect(),
                );
            }
        }

        let mut response = self.next_response(client_id, intent);
        loop {
            match response {
                MockResponse::Payload(value) => return Ok(value),
                MockResponse::Fail(message) => return Err(OtaError::Rejected(message)),
                MockResponse::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
            }
        }
    }

    async fn upload_firmware(&self, upload: FirmwareUpload) -> Result<UploadOutcome> {
        debug!(filename = %upload.filename, version = %upload.version, "Mock firmware upload");
        lock(&self.uploads).push(upload);
        Ok(UploadOutcome {
            success: true,
            message: Some("Firmware uploaded".to_string()),
        })
    }
}

#[async_trait]
impl DeviceRegistry for MockBackend {
    async fn list_devices(&self) -> Result<Vec<DeviceIdentity>> {
        *lock(&self.list_calls) += 1;
        Ok(self.devices.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FirmwareTarget;

    #[tokio::test]
    async fn test_scripted_responses_last_is_sticky() {
        let mock = MockBackend::new();
        mock.push_response("t", OtaIntent::Check, json!({"on_progress": 1}));
        mock.push_response("t", OtaIntent::Check, json!({"on_progress": 2}));

        assert_eq!(mock.query_ota_info("t", OtaIntent::Check).await.unwrap()["on_progress"], 1);
        assert_eq!(mock.query_ota_info("t", OtaIntent::Check).await.unwrap()["on_progress"], 2);
        assert_eq!(mock.query_ota_info("t", OtaIntent::Check).await.unwrap()["on_progress"], 2);
        assert_eq!(mock.query_ota_info("t", OtaIntent::Update).await.unwrap(), json!({}));
        assert_eq!(mock.call_count("t", OtaIntent::Check), 3);
    }

    #[tokio::test]
    async fn test_rollout_script_takes_over_checks() {
        let mock = MockBackend::new();
        mock.push_response("t", OtaIntent::Check, json!({"hasNewVersion": true}));
        mock.script_rollout("t", vec![json!({"on_progress": 50}), json!({"is_updating": false})]);

        assert_eq!(mock.query_ota_info("t", OtaIntent::Check).await.unwrap()["hasNewVersion"], true);
        assert_eq!(mock.query_ota_info("t", OtaIntent::Check).await.unwrap()["hasNewVersion"], true);

        mock.query_ota_info("t", OtaIntent::Update).await.unwrap();
        assert_eq!(mock.query_ota_info("t", OtaIntent::Check).await.unwrap()["on_progress"], 50);
        assert_eq!(mock.query_ota_info("t", OtaIntent::Check).await.unwrap()["is_updating"], false);
    }

    #[tokio::test]
    async fn test_clear_script_drops_sticky_response() {
        let mock = MockBackend::new();
        mock.push_response("t", OtaIntent::Update, json!({"error": ["low battery"]}));
        assert_eq!(mock.query_ota_info("t", OtaIntent::Update).await.unwrap()["error"][0], "low battery");

        mock.clear_script("t", OtaIntent::Update);
        assert_eq!(mock.query_ota_info("t", OtaIntent::Update).await.unwrap(), json!({}));

        mock.push_response("t", OtaIntent::Update, json!({"is_updating": true}));
        assert_eq!(mock.query_ota_info("t", OtaIntent::Update).await.unwrap()["is_updating"], true);
    }

    #[tokio::test]
    async fn test_failure_response() {
        let mock = MockBackend::new();
        mock.push_failure("t", OtaIntent::Update, "boom");
        assert!(matches!(
            mock.query_ota_info("t", OtaIntent::Update).await,
            Err(OtaError::Rejected(msg)) if msg == "boom"
        ));
    }

    #[tokio::test]
    async fn test_devices_and_uploads() {
        let mock = MockBackend::demo();
        assert_eq!(mock.list_devices().await.unwrap().len(), 2);
        assert_eq!(mock.list_calls(), 1);

        let outcome = mock
            .upload_firmware(FirmwareUpload {
                filename: "fw.bin".to_string(),
                change_log: "fixes".to_string(),
                version: "1.2.0".to_string(),
                target: FirmwareTarget::Master,
                content: vec![1, 2, 3],
            })
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(mock.uploads().len(), 1);
    }
}
