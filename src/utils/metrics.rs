//! Relay counters.
//!
//! Atomic counters owned by a [`Relay`](crate::service::relay::Relay) and shared with its
//! sessions through an `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Counters for one relay instance
#[derive(Debug)]
pub struct RelayMetrics {
    /// Sessions opened
    pub sessions_opened: AtomicU64,
    /// Sessions closed
    pub sessions_closed: AtomicU64,
    /// Handshakes that reached the encrypted state
    pub handshakes_completed: AtomicU64,
    /// Handshakes that ended in the failed state
    pub handshakes_failed: AtomicU64,
    /// Identity tokens served from the cache
    pub identity_cache_hits: AtomicU64,
    /// Identity tokens that required the provider flow
    pub identity_cache_misses: AtomicU64,
    start_time: Instant,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            handshakes_completed: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            identity_cache_hits: AtomicU64::new(0),
            identity_cache_misses: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn identity_cache_hit(&self) {
        self.identity_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn identity_cache_miss(&self) {
        self.identity_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let opened = self.sessions_opened.load(Ordering::Relaxed);
        let closed = self.sessions_closed.load(Ordering::Relaxed);
        MetricsSnapshot {
            sessions_opened: opened,
            sessions_active: opened.saturating_sub(closed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            identity_cache_hits: self.identity_cache_hits.load(Ordering::Relaxed),
            identity_cache_misses: self.identity_cache_misses.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            sessions_opened = snapshot.sessions_opened,
            sessions_active = snapshot.sessions_active,
            handshakes_completed = snapshot.handshakes_completed,
            handshakes_failed = snapshot.handshakes_failed,
            identity_cache_hits = snapshot.identity_cache_hits,
            identity_cache_misses = snapshot.identity_cache_misses,
            uptime_seconds = snapshot.uptime_seconds,
            "Relay metrics snapshot"
        );
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_active: u64,
    pub handshakes_completed: u64,
    pub handshakes_failed: u64,
    pub identity_cache_hits: u64,
    pub identity_cache_misses: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_sessions() {
        let metrics = RelayMetrics::new();
        metrics.session_opened();
        metrics.session_opened();
        metrics.session_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_opened, 2);
        assert_eq!(snapshot.sessions_active, 1);
    }
}
