//! Metrics collection and monitoring
//!
//! NIST 800-53: AU-12 (Audit Generation), SI-4 (System Monitoring)
//! Implementation: Lock-free counters shared by the session cache and the writer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transfer metrics collection
///
/// Cloning is cheap; clones share the same counters.
#[derive(Debug, Clone)]
pub struct TransferMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    // Session metrics
    connections_opened: AtomicU64,
    sessions_created: AtomicU64,
    sessions_reused: AtomicU64,
    sessions_disconnected: AtomicU64,
    pool_exhausted: AtomicU64,

    // Transfer metrics
    transfers_succeeded: AtomicU64,
    transfers_failed: AtomicU64,
    bytes_written: AtomicU64,
    directories_created: AtomicU64,

    start_time: DateTime<Utc>,
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Timestamp of snapshot
    pub timestamp: DateTime<Utc>,
    /// Seconds since the metrics were created
    pub uptime_seconds: i64,

    /// Underlying connections established
    pub connections_opened: u64,
    /// Sessions created by a session factory
    pub sessions_created: u64,
    /// Checkouts served from the idle pool
    pub sessions_reused: u64,
    /// Sessions disconnected by the pool (stale, reset, dead)
    pub sessions_disconnected: u64,
    /// Checkouts rejected because the pool was at capacity
    pub pool_exhausted: u64,

    /// Completed transfers
    pub transfers_succeeded: u64,
    /// Failed transfers
    pub transfers_failed: u64,
    /// Payload bytes written
    pub bytes_written: u64,
    /// Remote directories created
    pub directories_created: u64,
}

impl Default for TransferMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                connections_opened: AtomicU64::new(0),
                sessions_created: AtomicU64::new(0),
                sessions_reused: AtomicU64::new(0),
                sessions_disconnected: AtomicU64::new(0),
                pool_exhausted: AtomicU64::new(0),
                transfers_succeeded: AtomicU64::new(0),
                transfers_failed: AtomicU64::new(0),
                bytes_written: AtomicU64::new(0),
                directories_created: AtomicU64::new(0),
                start_time: Utc::now(),
            }),
        }
    }

    pub(crate) fn record_connection_opened(&self) {
        self.inner.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_created(&self) {
        self.inner.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_reused(&self) {
        self.inner.sessions_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_disconnected(&self) {
        self.inner.sessions_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pool_exhausted(&self) {
        self.inner.pool_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transfer(&self, bytes: u64) {
        self.inner.transfers_succeeded.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_transfer_failed(&self) {
        self.inner.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_directory_created(&self) {
        self.inner.directories_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Utc::now();
        let inner = &self.inner;

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: (now - inner.start_time).num_seconds(),
            connections_opened: inner.connections_opened.load(Ordering::Relaxed),
            sessions_created: inner.sessions_created.load(Ordering::Relaxed),
            sessions_reused: inner.sessions_reused.load(Ordering::Relaxed),
            sessions_disconnected: inner.sessions_disconnected.load(Ordering::Relaxed),
            pool_exhausted: inner.pool_exhausted.load(Ordering::Relaxed),
            transfers_succeeded: inner.transfers_succeeded.load(Ordering::Relaxed),
            transfers_failed: inner.transfers_failed.load(Ordering::Relaxed),
            bytes_written: inner.bytes_written.load(Ordering::Relaxed),
            directories_created: inner.directories_created.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = TransferMetrics::new();
        let clone = metrics.clone();

        clone.record_transfer(512);
        clone.record_transfer(512);
        metrics.record_transfer_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transfers_succeeded, 2);
        assert_eq!(snapshot.bytes_written, 1024);
        assert_eq!(snapshot.transfers_failed, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = TransferMetrics::new();
        metrics.record_session_created();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["sessions_created"], 1);
    }
}
