//! HTTP server for device-initiated OTA updates.
//!
//! Devices ask `/ota/check` whether a newer firmware exists and download it
//! from `/ota/download/:filename`. Every check is recorded in an in-memory
//! device log served at `/ota/devices`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use iotdash_ota::{has_update, Version};

use crate::config::{is_plain_file_name, Config};

/// Shared state for HTTP handlers
pub struct AppState {
    pub config: Config,
    /// Last check-in of every device, keyed by device id
    pub devices: RwLock<BTreeMap<String, DeviceRecord>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            devices: RwLock::new(BTreeMap::new()),
        }
    }
}

/// What the server remembers about a device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub last_check: DateTime<Utc>,
    pub current_version: String,
    /// Set when a check-in reports a newer version than the previous one
    pub last_update: Option<DateTime<Utc>>,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Serialize)]
struct ApiError {
    error: String,
    message: String,
}

impl ApiError {
    fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct CheckParams {
    device_id: Option<String>,
    current_version: Option<String>,
}

#[derive(Serialize)]
struct VersionEntry {
    version: String,
    filename: String,
    changelog: String,
    release_date: String,
    file_size: u64,
    is_latest: bool,
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router with all routes
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(status))
        .route("/ota/check", get(check_update))
        .route("/ota/download/:filename", get(download_firmware))
        .route("/ota/versions", get(list_versions))
        .route("/ota/devices", get(list_devices))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Create the firmware directory and serve until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;

    tokio::fs::create_dir_all(&config.firmware_dir)
        .await
        .with_context(|| format!("Failed to create firmware directory: {}", config.firmware_dir.display()))?;

    info!(
        address = %addr,
        latest_version = %config.latest_version,
        firmware_dir = %config.firmware_dir.display(),
        "Starting OTA server"
    );

    let app = build_router(Arc::new(AppState::new(config)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("OTA server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "OTA Server is running",
        "version": state.config.latest_version,
        "endpoints": {
            "check": "/ota/check?device_id={ID}&current_version={VERSION}",
            "download": "/ota/download/{FILENAME}",
            "versions": "/ota/versions",
            "devices": "/ota/devices",
        }
    }))
}

async fn check_update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<CheckParams>,
) -> ApiResult<Value> {
    let device_id = params.device_id.filter(|s| !s.trim().is_empty());
    let current_version = params.current_version.filter(|s| !s.trim().is_empty());
    let (Some(device_id), Some(current_version)) = (device_id, current_version) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                "missing_parameters",
                "Missing required parameters: device_id, current_version",
            )),
        ));
    };

    record_check_in(&state, &device_id, &current_version).await;

    let config = &state.config;
    let release = match config.latest_release() {
        Some(release) if has_update(&current_version, &config.latest_version) => release,
        _ => {
            debug!(device_id = %device_id, version = %current_version, "Device is up to date");
            return Ok(Json(json!({
                "has_update": false,
                "version": current_version,
                "message": "Already on latest version",
            })));
        }
    };

    info!(
        device_id = %device_id,
        current_version = %current_version,
        latest_version = %config.latest_version,
        "Offering firmware update"
    );

    let download_url = format!(
        "{}/ota/download/{}",
        public_base_url(config, &headers),
        release.filename
    );

    Ok(Json(json!({
        "has_update": true,
        "version": config.latest_version,
        "download_url": download_url,
        "changelog": release.changelog,
        "release_date": release.release_date,
        "file_size": file_size(config, &release.filename).await,
    })))
}

async fn record_check_in(state: &AppState, device_id: &str, current_version: &str) {
    let now = Utc::now();
    let mut devices = state.devices.write().await;

    let last_update = match devices.get(device_id) {
        Some(previous) if Version::from(current_version) > Version::from(previous.current_version.as_str()) => {
            info!(
                device_id = %device_id,
                from = %previous.current_version,
                to = %current_version,
                "Device reports updated firmware"
            );
            Some(now)
        }
        Some(previous) => previous.last_update,
        None => None,
    };

    devices.insert(
        device_id.to_string(),
        DeviceRecord {
            last_check: now,
            current_version: current_version.to_string(),
            last_update,
        },
    );
}

async fn download_firmware(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("not_found", "Firmware file not found")),
        )
            .into_response()
    };

    if !is_plain_file_name(&filename) {
        warn!(filename = %filename, "Rejected download with path separators");
        return not_found();
    }

    let path = state.config.firmware_dir.join(&filename);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            info!(filename = %filename, size = bytes.len(), "Serving firmware");
            (
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(filename = %filename, "Firmware file not found");
            not_found()
        }
        Err(e) => {
            warn!(filename = %filename, error = %e, "Failed to read firmware file");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("read_failed", "Error reading firmware file")),
            )
                .into_response()
        }
    }
}

async fn list_versions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;

    let mut versions = Vec::with_capacity(config.versions.len());
    for (version, release) in &config.versions {
        versions.push(VersionEntry {
            version: version.clone(),
            filename: release.filename.clone(),
            changelog: release.changelog.clone(),
            release_date: release.release_date.clone(),
            file_size: file_size(config, &release.filename).await,
            is_latest: *version == config.latest_version,
        });
    }
    versions.sort_by(|a, b| Version::from(a.version.as_str()).cmp(&Version::from(b.version.as_str())));

    Json(json!({
        "latest_version": config.latest_version,
        "total_versions": versions.len(),
        "versions": versions,
    }))
}

async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Value> {
    let devices = state.devices.read().await;
    Json(json!({
        "total_devices": devices.len(),
        "devices": *devices,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

/// Size of a firmware image, 0 when it is missing.
async fn file_size(config: &Config, filename: &str) -> u64 {
    tokio::fs::metadata(config.firmware_dir.join(filename))
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

fn public_base_url(config: &Config, headers: &HeaderMap) -> String {
    if let Some(url) = &config.public_url {
        return url.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or(&config.listen_address);
    format!("http://{}", host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let config = Config {
            firmware_dir: dir.path().to_path_buf(),
            public_url: Some("http://ota.test".to_string()),
            ..Config::default()
        };
        Arc::new(AppState::new(config))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(build_router(test_state(&dir)), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], "1.1.0");
    }

    #[tokio::test]
    async fn test_check_offers_update() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware_v1.1.0.bin"), vec![0u8; 1024]).unwrap();
        let state = test_state(&dir);

        let (status, body) = get_json(
            build_router(state.clone()),
            "/ota/check?device_id=esp-1&current_version=1.0.0",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_update"], true);
        assert_eq!(body["version"], "1.1.0");
        assert_eq!(body["download_url"], "http://ota.test/ota/download/firmware_v1.1.0.bin");
        assert_eq!(body["file_size"], 1024);
        assert_eq!(body["release_date"], "2024-02-01");
        assert!(state.devices.read().await.contains_key("esp-1"));
    }

    #[tokio::test]
    async fn test_check_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(
            build_router(test_state(&dir)),
            "/ota/check?device_id=esp-1&current_version=1.1.0",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_update"], false);
        assert_eq!(body["version"], "1.1.0");
        assert_eq!(body["message"], "Already on latest version");
    }

    #[tokio::test]
    async fn test_check_missing_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(build_router(test_state(&dir)), "/ota/check?device_id=esp-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_parameters");
    }

    #[tokio::test]
    async fn test_device_log_tracks_updates() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        get_json(build_router(state.clone()), "/ota/check?device_id=esp-1&current_version=1.0.0").await;
        let (_, body) = get_json(build_router(state.clone()), "/ota/devices").await;
        assert_eq!(body["total_devices"], 1);
        assert_eq!(body["devices"]["esp-1"]["current_version"], "1.0.0");
        assert!(body["devices"]["esp-1"]["last_update"].is_null());

        get_json(build_router(state.clone()), "/ota/check?device_id=esp-1&current_version=1.1.0").await;
        let (_, body) = get_json(build_router(state), "/ota/devices").await;
        assert_eq!(body["devices"]["esp-1"]["current_version"], "1.1.0");
        assert!(body["devices"]["esp-1"]["last_update"].is_string());
    }

    #[tokio::test]
    async fn test_versions_sorted_with_sizes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware_v1.0.1.bin"), b"abc").unwrap();
        let state = {
            let mut config = Config {
                firmware_dir: dir.path().to_path_buf(),
                ..Config::default()
            };
            config.versions.insert(
                "1.0.10".to_string(),
                crate::config::FirmwareRelease {
                    filename: "firmware_v1.0.10.bin".to_string(),
                    changelog: String::new(),
                    release_date: String::new(),
                },
            );
            Arc::new(AppState::new(config))
        };

        let (status, body) = get_json(build_router(state), "/ota/versions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_versions"], 4);

        let order: Vec<&str> = body["versions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["version"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["1.0.0", "1.0.1", "1.0.10", "1.1.0"]);
        assert_eq!(body["versions"][1]["file_size"], 3);
        assert_eq!(body["versions"][0]["file_size"], 0);
        assert_eq!(body["versions"][3]["is_latest"], true);
    }

    #[tokio::test]
    async fn test_download() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware_v1.1.0.bin"), b"firmware-bytes").unwrap();

        let response = build_router(test_state(&dir))
            .oneshot(
                Request::builder()
                    .uri("/ota/download/firmware_v1.1.0.bin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"firmware_v1.1.0.bin\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"firmware-bytes");
    }

    #[tokio::test]
    async fn test_download_missing_or_unsafe() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(build_router(test_state(&dir)), "/ota/download/missing.bin").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = get_json(build_router(test_state(&dir)), "/ota/download/..%2Fsecret").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
