//! Counters for the scheduling engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::pool::BackendLoad;

/// Monotonic counters updated by the scheduler
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Units placed in the admission queue (singles and completed bundles)
    pub units_admitted: AtomicU64,

    /// Submissions rejected as malformed
    pub admissions_rejected: AtomicU64,

    /// Bundle members buffered while their bundle was incomplete
    pub bundle_members_buffered: AtomicU64,

    /// Bundles that reached their declared size
    pub bundles_completed: AtomicU64,

    /// Bundles dropped by eviction or reset
    pub bundles_evicted: AtomicU64,

    /// Scheduler passes started (one per debounce window)
    pub passes_started: AtomicU64,

    /// Units handed to a backend
    pub units_dispatched: AtomicU64,

    /// Priority lookups that found no snapshot entry
    pub lookup_misses: AtomicU64,

    /// Total queue wait in milliseconds across dispatched units
    pub total_queue_wait_ms: AtomicU64,

    /// Largest queue depth observed
    pub max_queue_depth: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self, queue_depth: usize) {
        self.units_admitted.fetch_add(1, Ordering::Relaxed);
        self.max_queue_depth.fetch_max(queue_depth as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.admissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffered(&self) {
        self.bundle_members_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bundle_completed(&self) {
        self.bundles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bundles_evicted(&self, count: usize) {
        self.bundles_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_pass(&self) {
        self.passes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self, wait_time: Duration) {
        self.units_dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_queue_wait_ms
            .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_lookup_misses(&self, count: usize) {
        if count > 0 {
            self.lookup_misses.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Passes started so far
    pub fn passes(&self) -> u64 {
        self.passes_started.load(Ordering::Relaxed)
    }

    /// Average queue wait of dispatched units in milliseconds
    pub fn avg_queue_wait_ms(&self) -> f64 {
        let dispatched = self.units_dispatched.load(Ordering::Relaxed);
        if dispatched == 0 {
            return 0.0;
        }
        self.total_queue_wait_ms.load(Ordering::Relaxed) as f64 / dispatched as f64
    }
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub queue_depth: usize,
    pub pending_bundles: usize,
    pub backends: Vec<BackendLoad>,
    pub units_admitted: u64,
    pub admissions_rejected: u64,
    pub bundle_members_buffered: u64,
    pub bundles_completed: u64,
    pub bundles_evicted: u64,
    pub passes_started: u64,
    pub units_dispatched: u64,
    pub lookup_misses: u64,
    pub max_queue_depth: u64,
    pub avg_queue_wait_ms: f64,
}

impl SchedulerStats {
    pub(crate) fn collect(
        metrics: &SchedulerMetrics,
        queue_depth: usize,
        pending_bundles: usize,
        backends: Vec<BackendLoad>,
    ) -> Self {
        Self {
            queue_depth,
            pending_bundles,
            backends,
            units_admitted: metrics.units_admitted.load(Ordering::Relaxed),
            admissions_rejected: metrics.admissions_rejected.load(Ordering::Relaxed),
            bundle_members_buffered: metrics.bundle_members_buffered.load(Ordering::Relaxed),
            bundles_completed: metrics.bundles_completed.load(Ordering::Relaxed),
            bundles_evicted: metrics.bundles_evicted.load(Ordering::Relaxed),
            passes_started: metrics.passes_started.load(Ordering::Relaxed),
            units_dispatched: metrics.units_dispatched.load(Ordering::Relaxed),
            lookup_misses: metrics.lookup_misses.load(Ordering::Relaxed),
            max_queue_depth: metrics.max_queue_depth.load(Ordering::Relaxed),
            avg_queue_wait_ms: metrics.avg_queue_wait_ms(),
        }
    }

    /// Total in-flight dispatches across backends
    pub fn active(&self) -> usize {
        self.backends.iter().map(|b| b.active).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = SchedulerMetrics::new();
        metrics.record_admitted(1);
        metrics.record_admitted(3);
        metrics.record_admitted(2);
        metrics.record_dispatched(Duration::from_millis(100));
        metrics.record_dispatched(Duration::from_millis(300));
        metrics.record_lookup_misses(0);
        metrics.record_lookup_misses(2);

        let stats = SchedulerStats::collect(&metrics, 1, 0, Vec::new());
        assert_eq!(stats.units_admitted, 3);
        assert_eq!(stats.max_queue_depth, 3);
        assert_eq!(stats.units_dispatched, 2);
        assert_eq!(stats.avg_queue_wait_ms, 200.0);
        assert_eq!(stats.lookup_misses, 2);
    }

    #[test]
    fn test_active_sums_backends() {
        let metrics = SchedulerMetrics::new();
        let loads = vec![
            BackendLoad { address: "a".to_string(), active: 2 },
            BackendLoad { address: "b".to_string(), active: 1 },
        ];
        let stats = SchedulerStats::collect(&metrics, 0, 0, loads);
        assert_eq!(stats.active(), 3);
        assert_eq!(metrics.avg_queue_wait_ms(), 0.0);
    }
}
