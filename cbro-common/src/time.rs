//! Timestamp utilities
//!
//! Cache rows store wall-clock instants as Unix milliseconds so that expiry
//! comparisons are plain integer comparisons (and index range scans).

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current wall-clock time as Unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Whole days to a duration (cache TTLs are configured in days)
pub fn days_to_duration(days: u32) -> Duration {
    Duration::from_secs(u64::from(days) * 24 * 60 * 60)
}

/// Add a duration to a Unix-millisecond timestamp, saturating at `i64::MAX`
pub fn add_duration_millis(base_millis: i64, duration: Duration) -> i64 {
    let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
    base_millis.saturating_add(delta)
}

/// Render a Unix-millisecond timestamp for logs and CLI output
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
