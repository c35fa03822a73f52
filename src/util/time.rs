//! Time utilities for presence and attack timestamps
//!
//! All store-visible timestamps are unix milliseconds, matching the
//! heartbeat-age arithmetic used for liveness checks.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Milliseconds elapsed since a past `unix_millis` timestamp
pub fn millis_since(then: u64) -> u64 {
    unix_millis().saturating_sub(then)
}
