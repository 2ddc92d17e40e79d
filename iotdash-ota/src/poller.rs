//! Interval-based status polling keyed by device id.
//!
//! [`PollerRegistry`] keeps at most one poller per device. Starting a poller
//! for a device that already has one replaces it. Each tick issues its fetch
//! as a separate task, so a slow response never holds back the next tick;
//! responses are handed to the result handler in the order they arrive.
//!
//! Every poller gets a fresh [`PollGeneration`]. A response is delivered
//! only if its generation is still the active one for the device, so
//! anything that completes after `stop`, `stop_all` or a replacing `start`
//! is dropped.
//!
//! The registry also owns one-shot timers ([`PollerRegistry::schedule`]) for
//! follow-up work after polling ends. `stop_all` cancels them too and refuses
//! new ones, so nothing started through the registry outlives its owner.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::Result;

/// Identity of one started poller; increases monotonically per registry.
pub type PollGeneration = u64;

/// Shortest interval accepted by [`PollerRegistry::start`].
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of a single fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// The fetch succeeded
    Fetched(T),
    /// The fetch failed; polling continues
    Failed(String),
}

/// One delivered poll result.
#[derive(Debug, Clone)]
pub struct PollTick<T> {
    pub device_id: String,
    pub generation: PollGeneration,
    pub outcome: PollOutcome<T>,
}

struct ActivePoller {
    generation: PollGeneration,
    handle: JoinHandle<()>,
}

struct PendingTimer {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RegistryInner {
    next_generation: PollGeneration,
    active: HashMap<String, ActivePoller>,
    timers: HashMap<String, PendingTimer>,
    /// Set by `stop_all`; no timers are scheduled afterwards
    closed: bool,
}

/// Owner of all status pollers and follow-up timers for one dashboard.
///
/// `start`, `stop`, `schedule` and `stop_all` are the only mutators.
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct PollerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start polling `fetch` for `device_id` every `interval`, first tick
    /// immediately. Any existing poller for the device is stopped first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T, F, Fut, H>(
        &self,
        device_id: &str,
        fetch: F,
        interval: Duration,
        on_result: H,
    ) -> PollGeneration
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        H: Fn(PollTick<T>) + Send + Sync + 'static,
    {
        let interval = interval.max(MIN_POLL_INTERVAL);
        let mut inner = self.lock();

        if let Some(previous) = inner.active.remove(device_id) {
            debug!(
                device_id = %device_id,
                generation = previous.generation,
                "Replacing existing poller"
            );
            previous.handle.abort();
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;

        let registry = self.clone();
        let id = device_id.to_string();
        let on_result = Arc::new(on_result);

        // The lock is held until the poller is registered, so the first
        // tick cannot observe a missing entry.
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !registry.is_current(&id, generation) {
                    break;
                }

                let request = fetch();
                let registry = registry.clone();
                let on_result = on_result.clone();
                let id = id.clone();

                tokio::spawn(async move {
                    let outcome = match request.await {
                        Ok(value) => PollOutcome::Fetched(value),
                        Err(e) => {
                            warn!(device_id = %id, generation, error = %e, "Status fetch failed, will retry");
                            PollOutcome::Failed(e.to_string())
                        }
                    };

                    if !registry.is_current(&id, generation) {
                        debug!(device_id = %id, generation, "Discarding response from stopped poller");
                        return;
                    }

                    on_result(PollTick {
                        device_id: id,
                        generation,
                        outcome,
                    });
                });
            }
        });

        inner.active.insert(device_id.to_string(), ActivePoller { generation, handle });

        debug!(
            device_id = %device_id,
            generation,
            interval_ms = interval.as_millis() as u64,
            "Poller started"
        );

        generation
    }

    /// Stop polling for `device_id`. Returns whether a poller was running;
    /// stopping an unknown or already stopped device is a no-op.
    pub fn stop(&self, device_id: &str) -> bool {
        match self.lock().active.remove(device_id) {
            Some(poller) => {
                poller.handle.abort();
                debug!(device_id = %device_id, generation = poller.generation, "Poller stopped");
                true
            }
            None => false,
        }
    }

    /// Run `task` once after `delay` on behalf of `device_id`, replacing any
    /// timer still pending for that device. Returns false, scheduling
    /// nothing, once [`stop_all`](Self::stop_all) has run.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, device_id: &str, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.lock();
        if inner.closed {
            debug!(device_id = %device_id, "Registry stopped, timer not scheduled");
            return false;
        }

        if let Some(previous) = inner.timers.remove(device_id) {
            previous.handle.abort();
        }

        inner.next_generation += 1;
        let id = inner.next_generation;
        let registry = self.clone();
        let device = device_id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let fired = {
                let mut inner = registry.lock();
                let current = inner.timers.get(&device).map(|t| t.id) == Some(id);
                if current {
                    inner.timers.remove(&device);
                }
                current
            };
            if fired {
                task();
            }
        });

        inner.timers.insert(device_id.to_string(), PendingTimer { id, handle });
        true
    }

    /// Stop every poller and cancel every pending timer. Called when the
    /// owner is torn down; later `schedule` calls are refused.
    pub fn stop_all(&self) {
        let mut inner = self.lock();
        inner.closed = true;

        let count = inner.active.len();
        for (_, poller) in inner.active.drain() {
            poller.handle.abort();
        }
        let timers = inner.timers.len();
        for (_, timer) in inner.timers.drain() {
            timer.handle.abort();
        }
        if count > 0 || timers > 0 {
            debug!(count, timers, "All pollers stopped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of timers scheduled but not yet fired.
    pub fn pending_timers(&self) -> usize {
        self.lock().timers.len()
    }

    /// True if `generation` is the live poller for `device_id`.
    pub fn is_current(&self, device_id: &str, generation: PollGeneration) -> bool {
        self.lock()
            .active
            .get(device_id)
            .map(|p| p.generation == generation)
            .unwrap_or(false)
    }

    pub fn is_active(&self, device_id: &str) -> bool {
        self.lock().active.contains_key(device_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }
}
