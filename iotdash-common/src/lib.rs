//! # iotdash Common
//!
//! Shared utilities for the iotdash binaries.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use iotdash_common::init_logging;
//!
//! // Initialize with level; RUST_LOG overrides it when set
//! init_logging("info").unwrap();
//! tracing::info!(device_id = "esp32-01", "Rollout started");
//! ```

pub mod logging;

// Re-export logging functions
pub use logging::{
    init_logging,
    init_logging_json,
    init_logging_with_format,
    LogFormat,
};
