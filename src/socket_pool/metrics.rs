// ABOUTME: Metrics and observability for the socket pool
//
// Tracks:
// - Connections: created (lifetime), currently checked out, failed creations
// - Transport: reconnect attempts beyond the first
// - Cleanup: time of the last idle sweep
// - Per pool: creation time, connections created, creation failures

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Process-wide counters owned by the pool manager
#[derive(Debug, Default)]
pub struct ManagerMetrics {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    failed_connections: AtomicU64,
    reconnections: AtomicU64,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

impl ManagerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection_created(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_failed(&self) {
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn checked_out(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn checked_in(&self) {
        // Never wraps: every check-in pairs with an earlier checkout
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn add_reconnections(&self, count: u64) {
        self.reconnections.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn cleanup_ran(&self, at: DateTime<Utc>) {
        *self.last_cleanup.lock() = Some(at);
    }

    /// Combine the global counters with per-pool snapshots
    pub fn snapshot(&self, pools: Vec<PoolSnapshot>) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            last_cleanup: *self.last_cleanup.lock(),
            pools,
        }
    }
}

/// Counters kept by each per-key pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// When the pool was created
    pub created: DateTime<Utc>,
    /// Connections this pool has created
    pub total_connections: u64,
    /// Connection creations that failed
    pub failures: u64,
}

impl PoolStats {
    pub(crate) fn new() -> Self {
        Self {
            created: Utc::now(),
            total_connections: 0,
            failures: 0,
        }
    }
}

/// Point-in-time view of one pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub key: String,
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
    pub metrics: PoolStats,
}

/// Point-in-time view of the whole manager
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub failed_connections: u64,
    pub reconnections: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub pools: Vec<PoolSnapshot>,
}

impl MetricsSnapshot {
    /// Look up a pool by key
    pub fn pool(&self, key: &str) -> Option<&PoolSnapshot> {
        self.pools.iter().find(|p| p.key == key)
    }
}
