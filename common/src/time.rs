//! Time utilities for FxTracker.

use chrono::{DateTime, Local, TimeZone, Utc};

/// A timestamp with timezone (always UTC internally).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Convert a unix timestamp (seconds) as returned by the pricing API.
pub fn from_unix_seconds(seconds: i64) -> Option<Timestamp> {
    Utc.timestamp_opt(seconds, 0).single()
}

/// Render a refresh time in local time for status lines.
pub fn format_local(timestamp: Timestamp) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
