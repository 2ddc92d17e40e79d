//! OTA status records and normalization of backend payloads.
//!
//! The backend relays whatever the device firmware last reported, so every
//! field may be missing, null or of the wrong type. [`normalize`] turns such a
//! payload into a fully-defined [`OtaInfo`] and never fails.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::Version;

/// Unix timestamps above this are taken as milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// OTA status of one device, as of the last status fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OtaInfo {
    /// Device is currently flashing
    pub is_updating: bool,

    /// Flash completion percentage (0-100), meaningful while `is_updating`
    pub progress: u8,

    /// Device-side auto-update preference (informational)
    pub auto_update: bool,

    /// Version running on the device, `None` until it reports one
    pub current_version: Option<Version>,

    /// Most recently offered version, `None` until the first fetch
    pub last_version: Option<Version>,

    /// When the device last completed an update
    pub last_update_at: Option<DateTime<Utc>>,

    /// A newer version than `current_version` is available
    pub has_new_version: bool,

    /// Errors from the last status fetch; non-empty ends the current attempt
    pub errors: Vec<String>,
}

impl OtaInfo {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The flash finished: either signal is enough, since devices can
    /// report one a tick before the other.
    pub fn is_finished(&self) -> bool {
        !self.is_updating || self.progress >= 100
    }
}

/// Build an [`OtaInfo`] from a loosely typed backend payload.
pub fn normalize(raw: &Value) -> OtaInfo {
    OtaInfo {
        is_updating: as_bool(field(raw, "is_updating")),
        progress: as_progress(field(raw, "on_progress")),
        auto_update: as_bool(field(raw, "auto_update")),
        current_version: as_version(field(raw, "currentVersion")),
        last_version: as_version(field(raw, "lastVersion")),
        last_update_at: as_timestamp(field(raw, "lastUpdate")),
        has_new_version: as_bool(field(raw, "hasNewVersion")),
        errors: as_errors(field(raw, "error")),
    }
}

static NULL: Value = Value::Null;

fn field<'a>(raw: &'a Value, name: &str) -> &'a Value {
    raw.get(name).unwrap_or(&NULL)
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}

fn as_progress(value: &Value) -> u8 {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => n.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

fn as_version(value: &Value) -> Option<Version> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(Version::new(s.trim())),
        Value::Number(n) => Some(Version::new(n.to_string())),
        _ => None,
    }
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s.trim()),
        Value::Number(n) => n.as_i64().and_then(from_unix),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    s.parse::<i64>().ok().and_then(from_unix)
}

fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    if ts <= 0 {
        return None;
    }
    if ts >= MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(ts)
    } else {
        DateTime::from_timestamp(ts, 0)
    }
}

fn as_errors(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
