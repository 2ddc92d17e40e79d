//! Firmware rollout: trigger, track progress, finish.
//!
//! A rollout moves a device through
//! `Idle -> Triggering -> InProgress -> Completed -> Idle`, or ends in
//! `Failed` until acknowledged. While `InProgress`, the device's status is
//! polled every [`ROLLOUT_POLL_INTERVAL`] through the shared
//! [`PollerRegistry`]. Every attempt carries a ticket; poll results and
//! delayed transitions that belong to an older attempt are ignored.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{OtaBackend, OtaIntent};
use crate::check::{require_token, CheckResult};
use crate::error::{OtaError, Result};
use crate::info::normalize;
use crate::poller::{PollGeneration, PollOutcome, PollTick, PollerRegistry};
use crate::state::OtaStateStore;

/// Status poll interval while a rollout is in progress.
pub const ROLLOUT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long `Completed` stays visible before reverting to `Idle`.
pub const COMPLETION_DISPLAY_DELAY: Duration = Duration::from_secs(2);

/// Where a device is in its firmware rollout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RolloutState {
    /// Nothing running
    #[default]
    Idle,
    /// Update request sent, waiting for the backend to acknowledge
    Triggering,
    /// Device is flashing
    InProgress { progress: u8 },
    /// Flash finished; shown briefly before returning to `Idle`
    Completed,
    /// Attempt ended with errors; cleared by acknowledging
    Failed { errors: Vec<String> },
}

impl RolloutState {
    pub fn is_idle(&self) -> bool {
        matches!(self, RolloutState::Idle)
    }

    /// A rollout is being triggered or tracked; a new one must not start.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RolloutState::Triggering | RolloutState::InProgress { .. })
    }

    pub fn progress(&self) -> Option<u8> {
        match self {
            RolloutState::InProgress { progress } => Some(*progress),
            RolloutState::Completed => Some(100),
            _ => None,
        }
    }
}

/// Drives rollouts for all devices of one dashboard.
///
/// Completed rollouts ask the owner for a device list refresh by sending the
/// device id on the refresh channel.
#[derive(Clone)]
pub struct UpdateRolloutFlow {
    backend: Arc<dyn OtaBackend>,
    store: OtaStateStore,
    pollers: PollerRegistry,
    refresh_tx: mpsc::Sender<String>,
}

impl UpdateRolloutFlow {
    pub fn new(
        backend: Arc<dyn OtaBackend>,
        store: OtaStateStore,
        pollers: PollerRegistry,
        refresh_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            backend,
            store,
            pollers,
            refresh_tx,
        }
    }

    /// Start a firmware rollout on `device_id`.
    ///
    /// Rejected without touching state or the network if the device has no
    /// token or a rollout is already in flight. A transport failure on the
    /// trigger request marks the attempt `Failed` and is returned as `Err`;
    /// errors reported by the device mark it `Failed` and return `Ok`.
    #[instrument(skip_all, fields(device_id = %device_id))]
    pub async fn trigger(&self, device_id: &str, token_verify: Option<&str>) -> Result<()> {
        let token = require_token(device_id, token_verify)?.to_string();

        let attempt = self.store.next_ticket();
        self.store.update(device_id, |s| {
            if s.rollout.is_in_flight() {
                return Err(OtaError::RolloutInFlight(device_id.to_string()));
            }
            s.rollout = RolloutState::Triggering;
            s.check = CheckResult::Unchecked;
            // Invalidates any check still in flight.
            s.check_ticket = attempt;
            s.rollout_attempt = attempt;
            s.poll_generation = None;
            Ok(())
        })?;

        info!(attempt, "Triggering firmware update");

        let raw = match self.backend.query_ota_info(&token, OtaIntent::Update).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Update trigger failed");
                let message = e.to_string();
                self.store.update(device_id, |s| {
                    if s.rollout_attempt == attempt {
                        s.rollout = RolloutState::Failed { errors: vec![message] };
                    }
                });
                return Err(e);
            }
        };

        let ack = normalize(&raw);
        if ack.has_errors() {
            warn!(errors = ?ack.errors, "Device rejected update");
            self.store.update(device_id, |s| {
                if s.rollout_attempt == attempt {
                    s.rollout = RolloutState::Failed { errors: ack.errors.clone() };
                    s.info = Some(ack);
                }
            });
            return Ok(());
        }

        self.store.update(device_id, |s| {
            if s.rollout_attempt != attempt || s.rollout != RolloutState::Triggering {
                debug!("Rollout attempt superseded before acknowledgement");
                return;
            }
            s.info = Some(ack);
            s.rollout = RolloutState::InProgress { progress: 0 };
            s.poll_generation = Some(self.start_polling(device_id, token));
        });

        info!("Update acknowledged, tracking progress");
        Ok(())
    }

    /// Clear a `Failed` rollout back to `Idle`. Returns whether anything changed.
    pub fn acknowledge(&self, device_id: &str) -> bool {
        let cleared = self.store.update(device_id, |s| {
            if matches!(s.rollout, RolloutState::Failed { .. }) {
                s.rollout = RolloutState::Idle;
                true
            } else {
                false
            }
        });
        if cleared {
            debug!(device_id = %device_id, "Failed rollout acknowledged");
        }
        cleared
    }

    /// Called with the store lock held, so the generation is recorded
    /// before the first tick can be delivered.
    fn start_polling(&self, device_id: &str, token: String) -> PollGeneration {
        let backend = self.backend.clone();
        let fetch = move || {
            let backend = backend.clone();
            let token = token.clone();
            async move { backend.query_ota_info(&token, OtaIntent::Check).await }
        };

        let flow = self.clone();
        self.pollers
            .start(device_id, fetch, ROLLOUT_POLL_INTERVAL, move |tick| flow.on_poll_tick(tick))
    }

    fn on_poll_tick(&self, tick: PollTick<Value>) {
        let PollTick {
            device_id,
            generation,
            outcome,
        } = tick;

        let raw = match outcome {
            PollOutcome::Fetched(raw) => raw,
            // Already logged by the poller; keep the last known progress.
            PollOutcome::Failed(_) => return,
        };
        let mut info = normalize(&raw);

        let completed_attempt = self.store.update(&device_id, |s| {
            if s.poll_generation != Some(generation) {
                debug!(device_id = %device_id, generation, "Ignoring status from stale poller");
                return None;
            }

            if info.has_errors() {
                self.pollers.stop(&device_id);
                s.poll_generation = None;
                warn!(device_id = %device_id, errors = ?info.errors, "Firmware update failed");
                s.rollout = RolloutState::Failed { errors: info.errors.clone() };
                s.info = Some(info);
                return None;
            }

            if info.is_finished() {
                self.pollers.stop(&device_id);
                s.poll_generation = None;
                info.progress = 100;
                s.info = Some(info);
                s.rollout = RolloutState::Completed;
                info!(device_id = %device_id, "Firmware update completed");
                return Some(s.rollout_attempt);
            }

            s.rollout = RolloutState::InProgress { progress: info.progress };
            s.info = Some(info);
            None
        });

        if let Some(attempt) = completed_attempt {
            self.finish_after_delay(device_id, attempt);
        }
    }

    /// Revert `Completed` to `Idle` after the display delay and ask for one
    /// refresh. The timer belongs to the poller registry, so `stop_all`
    /// cancels it.
    fn finish_after_delay(&self, device_id: String, attempt: u64) {
        let store = self.store.clone();
        let pollers = self.pollers.clone();
        let refresh_tx = self.refresh_tx.clone();
        let id = device_id.clone();

        let scheduled = self.pollers.schedule(&device_id, COMPLETION_DISPLAY_DELAY, move || {
            let reverted = store.update(&id, |s| {
                if pollers.is_closed() || s.rollout_attempt != attempt || s.rollout != RolloutState::Completed {
                    return false;
                }
                s.rollout = RolloutState::Idle;
                true
            });
            if !reverted {
                return;
            }

            match refresh_tx.try_send(id) {
                Ok(()) => {}
                // A queued request reloads this device too.
                Err(TrySendError::Full(id)) => {
                    debug!(device_id = %id, "Refresh already pending, not queueing another");
                }
                Err(TrySendError::Closed(id)) => {
                    debug!(device_id = %id, "Refresh channel closed, skipping device list refresh");
                }
            }
        });

        if !scheduled {
            debug!(device_id = %device_id, "Pollers stopped, rollout stays completed");
        }
    }
}
