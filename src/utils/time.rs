//! Clock helpers shared by token expiry checks and request signing.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between 1601-01-01 (Windows epoch) and 1970-01-01.
const WINDOWS_EPOCH_OFFSET_SECS: u64 = 11_644_473_600;

/// Current unix time in whole seconds.
///
/// A clock set before 1970 reads as zero, which makes every cached token look expired.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Windows FILETIME (100ns ticks since 1601) for a unix second.
pub fn filetime_from_unix(unix_secs: i64) -> u64 {
    (unix_secs.max(0) as u64 + WINDOWS_EPOCH_OFFSET_SECS) * 10_000_000
}

/// Windows FILETIME for the current second.
pub fn filetime_now() -> u64 {
    filetime_from_unix(unix_now())
}
