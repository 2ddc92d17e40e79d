//! Per-device presentation model.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use tracing::debug;

use crate::backend::DeviceIdentity;
use crate::check::CheckResult;
use crate::info::OtaInfo;
use crate::rollout::RolloutState;
use crate::state::OtaStateStore;

/// What the dashboard shows for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceOtaView {
    pub device: DeviceIdentity,
    /// `None` until the first successful status fetch
    pub info: Option<OtaInfo>,
    pub rollout: RolloutState,
    pub check: CheckResult,
}

impl DeviceOtaView {
    /// Whether the update action should be offered.
    pub fn can_trigger(&self) -> bool {
        self.device.token().is_some() && !self.rollout.is_in_flight()
    }
}

/// The current device list joined with per-device OTA state.
///
/// The device list is replaced wholesale on every reload. OTA state lives in
/// the shared store and survives reloads for every device that is still
/// listed, or that is still mid-rollout.
pub struct DeviceBoard {
    devices: RwLock<Vec<DeviceIdentity>>,
    store: OtaStateStore,
}

impl DeviceBoard {
    pub fn new(store: OtaStateStore) -> Self {
        Self {
            devices: RwLock::new(Vec::new()),
            store,
        }
    }

    /// Replace the device list.
    pub fn reload(&self, devices: Vec<DeviceIdentity>) {
        let listed: HashSet<&str> = devices.iter().map(|d| d.id.as_str()).collect();

        let mut dropped = 0usize;
        self.store.retain(|id, state| {
            let keep = listed.contains(id) || !state.rollout.is_idle();
            if !keep {
                dropped += 1;
            }
            keep
        });

        debug!(devices = devices.len(), dropped, "Device list reloaded");
        *self.devices.write().unwrap_or_else(PoisonError::into_inner) = devices;
    }

    /// Views for all listed devices, in registry order.
    pub fn views(&self) -> Vec<DeviceOtaView> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|device| self.view_for(device))
            .collect()
    }

    pub fn view(&self, device_id: &str) -> Option<DeviceOtaView> {
        self.identity(device_id).map(|device| self.view_for(&device))
    }

    pub fn identity(&self, device_id: &str) -> Option<DeviceIdentity> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn view_for(&self, device: &DeviceIdentity) -> DeviceOtaView {
        let state = self.store.get(&device.id).unwrap_or_default();
        DeviceOtaView {
            device: device.clone(),
            info: state.info,
            rollout: state.rollout,
            check: state.check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ConnectionStatus;

    fn device(id: &str, name: &str) -> DeviceIdentity {
        DeviceIdentity {
            id: id.to_string(),
            name: name.to_string(),
            device_type: "master".to_string(),
            token_verify: Some(format!("tok-{}", id)),
            connection_status: ConnectionStatus::Online,
        }
    }

    #[test]
    fn test_views_follow_registry_order() {
        let board = DeviceBoard::new(OtaStateStore::new());
        board.reload(vec![device("b", "B"), device("a", "A")]);

        let ids: Vec<String> = board.views().into_iter().map(|v| v.device.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(board.view("a").unwrap().rollout, RolloutState::Idle);
        assert!(board.view("zzz").is_none());
    }

    #[test]
    fn test_reload_preserves_rollout_state() {
        let store = OtaStateStore::new();
        let board = DeviceBoard::new(store.clone());
        board.reload(vec![device("d", "Old name")]);
        store.update("d", |s| s.rollout = RolloutState::InProgress { progress: 55 });

        board.reload(vec![device("d", "New name"), device("e", "E")]);

        let view = board.view("d").unwrap();
        assert_eq!(view.device.name, "New name");
        assert_eq!(view.rollout, RolloutState::InProgress { progress: 55 });
        assert!(!view.can_trigger());
        assert!(board.view("e").unwrap().can_trigger());
    }

    #[test]
    fn test_reload_drops_state_of_removed_idle_devices_only() {
        let store = OtaStateStore::new();
        let board = DeviceBoard::new(store.clone());
        board.reload(vec![device("idle", "I"), device("busy", "B")]);
        store.update("idle", |s| s.check = CheckResult::UpToDate);
        store.update("busy", |s| s.rollout = RolloutState::Triggering);

        board.reload(vec![]);

        assert!(board.is_empty());
        assert!(store.get("idle").is_none());
        assert_eq!(store.rollout("busy"), RolloutState::Triggering);
    }
}
