//! Millisecond timestamp helpers.

use chrono::{DateTime, Utc};

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a timestamp to milliseconds since the Unix epoch.
#[must_use]
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}
