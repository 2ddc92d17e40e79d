//! Per-device OTA state shared by the check and rollout flows.
//!
//! One store per dashboard. The mutex is never held across an `.await`;
//! every mutation is a short synchronous closure via [`OtaStateStore::update`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::check::CheckResult;
use crate::info::OtaInfo;
use crate::poller::PollGeneration;
use crate::rollout::RolloutState;

/// The OTA info / rollout / check triplet for one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceOtaState {
    pub info: Option<OtaInfo>,
    pub rollout: RolloutState,
    pub check: CheckResult,
    /// Ticket of the newest check allowed to write `check`
    pub(crate) check_ticket: u64,
    /// Ticket of the current rollout attempt
    pub(crate) rollout_attempt: u64,
    /// Generation of the poller tracking the current attempt
    pub(crate) poll_generation: Option<PollGeneration>,
}

/// Shared, cloneable handle to the per-device state map.
#[derive(Debug, Clone, Default)]
pub struct OtaStateStore {
    devices: Arc<Mutex<HashMap<String, DeviceOtaState>>>,
    tickets: Arc<AtomicU64>,
}

impl OtaStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DeviceOtaState>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand out a ticket; tickets increase monotonically across all devices.
    pub(crate) fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Mutate a device's state, creating it on first use.
    pub fn update<R>(&self, device_id: &str, f: impl FnOnce(&mut DeviceOtaState) -> R) -> R {
        let mut devices = self.lock();
        let state = devices.entry(device_id.to_string()).or_default();
        f(state)
    }

    /// Snapshot of a device's state.
    pub fn get(&self, device_id: &str) -> Option<DeviceOtaState> {
        self.lock().get(device_id).cloned()
    }

    pub fn rollout(&self, device_id: &str) -> RolloutState {
        self.get(device_id).map(|s| s.rollout).unwrap_or_default()
    }

    pub fn check_result(&self, device_id: &str) -> CheckResult {
        self.get(device_id).map(|s| s.check).unwrap_or_default()
    }

    pub fn info(&self, device_id: &str) -> Option<OtaInfo> {
        self.get(device_id).and_then(|s| s.info)
    }

    /// Keep only the devices for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&str, &DeviceOtaState) -> bool) {
        self.lock().retain(|id, state| keep(id, state));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
