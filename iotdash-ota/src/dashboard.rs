//! OTA dashboard - owns the device list, the flows and their pollers.
//!
//! One [`OtaDashboard`] corresponds to one open OTA screen. Dropping it, or
//! calling [`OtaDashboard::shutdown`], stops every poller it started and
//! cancels pending completion timers.
//!
//! Completed rollouts ask for a device list refresh through a bounded
//! channel; [`OtaDashboard::run_refresh_loop`] serves those requests and must
//! be spawned by the owner if refreshes are wanted.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{
    DeviceIdentity, DeviceRegistry, FirmwareUpload, OtaBackend, OtaIntent, UploadOutcome,
};
use crate::check::{CheckResult, UpdateCheckFlow};
use crate::error::{OtaError, Result};
use crate::info::normalize;
use crate::poller::PollerRegistry;
use crate::rollout::UpdateRolloutFlow;
use crate::state::OtaStateStore;
use crate::view::{DeviceBoard, DeviceOtaView};

/// Capacity of the refresh request channel.
const REFRESH_CHANNEL_CAPACITY: usize = 16;

pub struct OtaDashboard {
    backend: Arc<dyn OtaBackend>,
    registry: Arc<dyn DeviceRegistry>,
    store: OtaStateStore,
    pollers: PollerRegistry,
    board: DeviceBoard,
    checks: UpdateCheckFlow,
    rollouts: UpdateRolloutFlow,
    /// Receiver for refresh requests (moved into `run_refresh_loop`)
    refresh_rx: RwLock<Option<mpsc::Receiver<String>>>,
}

impl OtaDashboard {
    pub fn new(backend: Arc<dyn OtaBackend>, registry: Arc<dyn DeviceRegistry>) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_CHANNEL_CAPACITY);
        let store = OtaStateStore::new();
        let pollers = PollerRegistry::new();

        Self {
            checks: UpdateCheckFlow::new(backend.clone(), store.clone()),
            rollouts: UpdateRolloutFlow::new(backend.clone(), store.clone(), pollers.clone(), refresh_tx),
            board: DeviceBoard::new(store.clone()),
            backend,
            registry,
            store,
            pollers,
            refresh_rx: RwLock::new(Some(refresh_rx)),
        }
    }

    /// Reload the device list, then fetch the OTA status of every idle
    /// device that has a token. Returns the number of listed devices.
    ///
    /// A failed status fetch only leaves that device's info unchanged.
    #[instrument(skip(self))]
    pub async fn reload_devices(&self) -> Result<usize> {
        let devices = self.registry.list_devices().await?;
        let count = devices.len();
        self.board.reload(devices.clone());

        let fetches = devices
            .iter()
            .filter(|device| self.store.rollout(&device.id).is_idle())
            .filter_map(|device| device.token().map(|token| (device, token)))
            .map(|(device, token)| self.refresh_info(device, token));
        join_all(fetches).await;

        info!(devices = count, "Devices loaded");
        Ok(count)
    }

    async fn refresh_info(&self, device: &DeviceIdentity, token: &str) {
        match self.backend.query_ota_info(token, OtaIntent::Check).await {
            Ok(raw) => {
                let info = normalize(&raw);
                self.store.update(&device.id, |s| {
                    // A rollout started meanwhile owns the info now.
                    if s.rollout.is_idle() {
                        s.info = Some(info);
                    }
                });
            }
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "Failed to fetch OTA info");
            }
        }
    }

    fn identity(&self, device_id: &str) -> Result<DeviceIdentity> {
        self.board
            .identity(device_id)
            .ok_or_else(|| OtaError::UnknownDevice(device_id.to_string()))
    }

    /// Run an update check for a listed device.
    pub async fn check(&self, device_id: &str) -> Result<CheckResult> {
        let device = self.identity(device_id)?;
        self.checks.check(&device.id, device.token()).await
    }

    /// Start a rollout on a listed device.
    pub async fn trigger(&self, device_id: &str) -> Result<()> {
        let device = self.identity(device_id)?;
        self.rollouts.trigger(&device.id, device.token()).await
    }

    /// Clear a failed rollout.
    pub fn acknowledge(&self, device_id: &str) -> bool {
        self.rollouts.acknowledge(device_id)
    }

    pub fn views(&self) -> Vec<DeviceOtaView> {
        self.board.views()
    }

    pub fn view(&self, device_id: &str) -> Option<DeviceOtaView> {
        self.board.view(device_id)
    }

    pub async fn upload_firmware(&self, upload: FirmwareUpload) -> Result<UploadOutcome> {
        self.backend.upload_firmware(upload).await
    }

    /// Number of rollouts currently being polled.
    pub fn active_pollers(&self) -> usize {
        self.pollers.active_count()
    }

    /// Serve refresh requests from completed rollouts until the channel
    /// closes. Requests that pile up during a reload are served by one
    /// reload.
    pub async fn run_refresh_loop(&self) {
        let mut refresh_rx = {
            let mut rx_guard = self.refresh_rx.write().await;
            match rx_guard.take() {
                Some(rx) => rx,
                None => {
                    error!("OtaDashboard::run_refresh_loop called multiple times");
                    return;
                }
            }
        };

        while let Some(device_id) = refresh_rx.recv().await {
            let mut coalesced = 0usize;
            while refresh_rx.try_recv().is_ok() {
                coalesced += 1;
            }
            debug!(device_id = %device_id, coalesced, "Refreshing device list after rollout");

            if let Err(e) = self.reload_devices().await {
                warn!(error = %e, "Device list refresh failed");
            }
        }
    }

    /// Stop every poller and cancel pending completion timers. Later poll
    /// responses are discarded and no further refreshes are requested.
    pub fn shutdown(&self) {
        self.pollers.stop_all();
    }
}

impl Drop for OtaDashboard {
    fn drop(&mut self) {
        self.pollers.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ConnectionStatus;
    use crate::mock::MockBackend;
    use crate::rollout::RolloutState;
    use serde_json::json;
    use std::time::Duration;

    fn device(id: &str, token: Option<&str>) -> DeviceIdentity {
        DeviceIdentity {
            id: id.to_string(),
            name: format!("Device {}", id),
            device_type: "master".to_string(),
            token_verify: token.map(str::to_string),
            connection_status: ConnectionStatus::Online,
        }
    }

    fn dashboard(mock: &Arc<MockBackend>) -> Arc<OtaDashboard> {
        Arc::new(OtaDashboard::new(mock.clone(), mock.clone()))
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test]
    async fn test_reload_fetches_info_for_devices_with_token() {
        let mock = Arc::new(MockBackend::with_devices(vec![device("1", Some("t1")), device("2", None)]));
        mock.push_response("t1", OtaIntent::Check, json!({"currentVersion": "1.0.0", "hasNewVersion": true}));
        let dash = dashboard(&mock);

        assert_eq!(dash.reload_devices().await.unwrap(), 2);

        let views = dash.views();
        assert_eq!(views.len(), 2);
        assert!(views[0].info.as_ref().unwrap().has_new_version);
        // Background fetches never touch the check verdict.
        assert_eq!(views[0].check, CheckResult::Unchecked);
        assert!(views[1].info.is_none());
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_tolerates_failed_status_fetch() {
        let mock = Arc::new(MockBackend::with_devices(vec![device("1", Some("t1"))]));
        mock.push_failure("t1", OtaIntent::Check, "timeout");
        let dash = dashboard(&mock);

        assert_eq!(dash.reload_devices().await.unwrap(), 1);
        assert!(dash.view("1").unwrap().info.is_none());
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let mock = Arc::new(MockBackend::new());
        let dash = dashboard(&mock);
        dash.reload_devices().await.unwrap();

        assert!(matches!(dash.check("nope").await, Err(OtaError::UnknownDevice(_))));
        assert!(matches!(dash.trigger("nope").await, Err(OtaError::UnknownDevice(_))));
    }

    #[tokio::test]
    async fn test_check_through_dashboard() {
        let mock = Arc::new(MockBackend::with_devices(vec![device("1", Some("t1")), device("2", None)]));
        mock.push_response("t1", OtaIntent::Check, json!({"hasNewVersion": true}));
        let dash = dashboard(&mock);
        dash.reload_devices().await.unwrap();

        assert_eq!(dash.check("1").await.unwrap(), CheckResult::UpdateAvailable);
        assert_eq!(dash.view("1").unwrap().check, CheckResult::UpdateAvailable);
        assert!(matches!(dash.check("2").await, Err(OtaError::MissingToken(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_survives_reload_and_refreshes_on_completion() {
        let mock = Arc::new(MockBackend::with_devices(vec![device("1", Some("t1"))]));
        mock.push_response("t1", OtaIntent::Check, json!({"currentVersion": "1.0.0"}));
        mock.push_response("t1", OtaIntent::Check, json!({"is_updating": true, "on_progress": 55}));
        mock.push_response("t1", OtaIntent::Check, json!({"is_updating": false, "currentVersion": "1.1.0"}));
        let dash = dashboard(&mock);

        let refresher = {
            let dash = dash.clone();
            tokio::spawn(async move { dash.run_refresh_loop().await })
        };

        dash.reload_devices().await.unwrap();
        assert_eq!(mock.list_calls(), 1);

        dash.trigger("1").await.unwrap();
        advance(100).await;
        assert_eq!(dash.view("1").unwrap().rollout, RolloutState::InProgress { progress: 55 });

        // A reload in the middle of the rollout keeps its state.
        dash.reload_devices().await.unwrap();
        assert_eq!(dash.view("1").unwrap().rollout, RolloutState::InProgress { progress: 55 });
        assert_eq!(dash.active_pollers(), 1);

        advance(2_000).await;
        assert_eq!(dash.view("1").unwrap().rollout, RolloutState::Completed);
        assert_eq!(dash.active_pollers(), 0);

        advance(2_100).await;
        let view = dash.view("1").unwrap();
        assert_eq!(view.rollout, RolloutState::Idle);
        assert_eq!(mock.list_calls(), 3);
        assert_eq!(
            view.info.and_then(|i| i.current_version).map(|v| v.to_string()),
            Some("1.1.0".to_string())
        );

        refresher.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_pollers() {
        let mock = Arc::new(MockBackend::with_devices(vec![device("1", Some("t1"))]));
        mock.push_response("t1", OtaIntent::Check, json!({"is_updating": true, "on_progress": 10}));
        let dash = dashboard(&mock);
        dash.reload_devices().await.unwrap();

        dash.trigger("1").await.unwrap();
        advance(100).await;
        assert_eq!(dash.active_pollers(), 1);

        dash.shutdown();
        assert_eq!(dash.active_pollers(), 0);

        let polls = mock.call_count("t1", OtaIntent::Check);
        advance(10_000).await;
        assert_eq!(mock.call_count("t1", OtaIntent::Check), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_completion_refresh() {
        let mock = Arc::new(MockBackend::with_devices(vec![device("1", Some("t1"))]));
        mock.push_response("t1", OtaIntent::Check, json!({"is_updating": false, "currentVersion": "1.1.0"}));
        let dash = dashboard(&mock);

        let refresher = {
            let dash = dash.clone();
            tokio::spawn(async move { dash.run_refresh_loop().await })
        };

        dash.reload_devices().await.unwrap();
        dash.trigger("1").await.unwrap();
        advance(100).await;
        assert_eq!(dash.view("1").unwrap().rollout, RolloutState::Completed);

        dash.shutdown();
        let list_calls = mock.list_calls();
        advance(5_000).await;

        assert_eq!(dash.view("1").unwrap().rollout, RolloutState::Completed);
        assert_eq!(mock.list_calls(), list_calls);
        refresher.abort();
    }

    #[tokio::test]
    async fn test_refresh_loop_runs_once() {
        let mock = Arc::new(MockBackend::new());
        let dash = dashboard(&mock);
        let first = {
            let dash = dash.clone();
            tokio::spawn(async move { dash.run_refresh_loop().await })
        };
        tokio::task::yield_now().await;

        // The second call returns immediately.
        tokio::time::timeout(Duration::from_secs(1), dash.run_refresh_loop())
            .await
            .unwrap();
        first.abort();
    }
}
