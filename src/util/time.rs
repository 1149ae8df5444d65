use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Utc};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Local wall-clock label for a capture timestamp (`HH:MM:SS`).
pub fn clock_label(ts_ms: u64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ts_ms as i64) {
        Some(ts) => ts.with_timezone(&Local).format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

/// Filesystem-safe UTC timestamp used in export file names.
pub fn file_stamp(ts_ms: u64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ts_ms as i64) {
        Some(ts) => ts.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string(),
        None => "unknown-time".to_string(),
    }
}
