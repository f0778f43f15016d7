//! Session counters for round trips, transaction scopes and cache hits.

use std::sync::atomic::{AtomicU64, Ordering};

/// Round-trip and transaction counters kept by a session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    queries: AtomicU64,
    scopes_begun: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    cache_hits: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Queries sent to the transport.
    pub queries: u64,
    /// Outermost transaction scopes opened.
    pub scopes_begun: u64,
    /// Outermost scopes committed.
    pub commits: u64,
    /// Outermost scopes rolled back.
    pub rollbacks: u64,
    /// Reads answered from a materialized or preloaded cache.
    pub cache_hits: u64,
}

impl SessionMetrics {
    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_begin(&self) {
        self.scopes_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            scopes_begun: self.scopes_begun.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Share of reads served without a round trip.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.queries;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}
