//! # iotdash OTA
//!
//! Over-the-air firmware update coordination for iotdash devices.
//!
//! The dashboard asks the backend whether a device has newer firmware
//! ([`UpdateCheckFlow`]), triggers the update and follows its progress until
//! the device reports completion or errors ([`UpdateRolloutFlow`]). Status
//! polling is owned by a single [`PollerRegistry`] per dashboard, so every
//! poller can be stopped when the dashboard goes away.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 OtaDashboard                 │
//! │  DeviceBoard (device list + per-device view) │
//! └──────┬──────────────────┬────────────────────┘
//!        ▼                  ▼
//! ┌───────────────┐  ┌──────────────────┐
//! │UpdateCheckFlow│  │UpdateRolloutFlow │──► PollerRegistry
//! └──────┬────────┘  └────────┬─────────┘
//!        └────────┬───────────┘
//!                 ▼
//!   OtaBackend / DeviceRegistry traits
//!        (HttpBackend, MockBackend)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use iotdash_ota::{MockBackend, OtaDashboard};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = Arc::new(MockBackend::demo());
//!     let dashboard = OtaDashboard::new(backend.clone(), backend);
//!
//!     dashboard.reload_devices().await.unwrap();
//!     dashboard.trigger("1").await.unwrap();
//! }
//! ```

pub mod backend;
pub mod check;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod http;
pub mod info;
pub mod mock;
pub mod poller;
pub mod rollout;
pub mod state;
pub mod version;
pub mod view;

pub use backend::{
    ConnectionStatus, DeviceIdentity, DeviceRegistry, FirmwareTarget, FirmwareUpload, OtaBackend,
    OtaIntent, UploadOutcome,
};
pub use check::{CheckResult, UpdateCheckFlow};
pub use config::BackendConfig;
pub use dashboard::OtaDashboard;
pub use error::{OtaError, Result};
pub use http::HttpBackend;
pub use info::{normalize, OtaInfo};
pub use mock::{MockBackend, MockResponse};
pub use poller::{PollGeneration, PollOutcome, PollTick, PollerRegistry};
pub use rollout::{RolloutState, UpdateRolloutFlow, COMPLETION_DISPLAY_DELAY, ROLLOUT_POLL_INTERVAL};
pub use state::{DeviceOtaState, OtaStateStore};
pub use version::{compare_versions, has_update, Version};
pub use view::{DeviceBoard, DeviceOtaView};
