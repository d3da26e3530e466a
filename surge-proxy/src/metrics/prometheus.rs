//! Prometheus metrics for the surge proxy
//!
//! Exposes metrics in Prometheus format for monitoring and observability.

use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use surge_core::SchedulerStats;

lazy_static! {
    /// Global Prometheus registry for surge metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Admission Metrics ==============

    /// Admissions by outcome (queued, buffered, bundle_completed, rejected)
    pub static ref ADMISSIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("admissions_total", "Total admissions by outcome")
            .namespace("surge"),
        &["outcome"]
    ).expect("metric can be created");

    // ============== Dispatch Metrics ==============

    /// Backend calls with backend and response status labels
    pub static ref DISPATCH_TOTAL: CounterVec = CounterVec::new(
        Opts::new("dispatch_total", "Total backend calls")
            .namespace("surge"),
        &["backend", "status"]
    ).expect("metric can be created");

    /// Backend call duration histogram
    pub static ref DISPATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "dispatch_duration_seconds",
            "Backend call duration in seconds"
        )
        .namespace("surge")
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["backend"]
    ).expect("metric can be created");

    // ============== Scheduler Metrics ==============

    /// Units waiting for a backend
    pub static ref QUEUE_SIZE: Gauge = Gauge::with_opts(
        Opts::new("queue_size", "Current number of units in the admission queue")
            .namespace("surge")
    ).expect("metric can be created");

    /// In-flight dispatches per backend
    pub static ref BACKEND_ACTIVE_REQUESTS: GaugeVec = GaugeVec::new(
        Opts::new("backend_active_requests", "Dispatches currently in flight per backend")
            .namespace("surge"),
        &["backend"]
    ).expect("metric can be created");

    /// Bundles waiting for members
    pub static ref PENDING_BUNDLES: Gauge = Gauge::with_opts(
        Opts::new("pending_bundles", "Bundles waiting for more members")
            .namespace("surge")
    ).expect("metric can be created");

    // ============== Priority Metrics ==============

    /// Priority snapshot refreshes by status (success, error)
    pub static ref PRIORITY_REFRESH_TOTAL: CounterVec = CounterVec::new(
        Opts::new("priority_refresh_total", "Priority snapshot refresh attempts")
            .namespace("surge"),
        &["status"]
    ).expect("metric can be created");

    /// Entries in the current priority snapshot
    pub static ref PRIORITY_SNAPSHOT_ENTRIES: Gauge = Gauge::with_opts(
        Opts::new("priority_snapshot_entries", "Entries in the current priority snapshot")
            .namespace("surge")
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMISSIONS_TOTAL.clone()))?;

    REGISTRY.register(Box::new(DISPATCH_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DISPATCH_DURATION_SECONDS.clone()))?;

    REGISTRY.register(Box::new(QUEUE_SIZE.clone()))?;
    REGISTRY.register(Box::new(BACKEND_ACTIVE_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(PENDING_BUNDLES.clone()))?;

    REGISTRY.register(Box::new(PRIORITY_REFRESH_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PRIORITY_SNAPSHOT_ENTRIES.clone()))?;

    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Tracks one backend call.
/// A timer dropped without [`DispatchTimer::finish`] counts as cancelled.
pub struct DispatchTimer {
    backend: String,
    start: Instant,
    finished: bool,
}

impl DispatchTimer {
    /// Start timing a call to `backend`
    pub fn start(backend: &str) -> Self {
        Self { backend: backend.to_string(), start: Instant::now(), finished: false }
    }

    /// Record the call with `status` (an HTTP status code or `error`)
    pub fn finish(mut self, status: &str) {
        self.observe(status);
        self.finished = true;
    }

    fn observe(&self, status: &str) {
        DISPATCH_DURATION_SECONDS
            .with_label_values(&[&self.backend])
            .observe(self.start.elapsed().as_secs_f64());
        DISPATCH_TOTAL
            .with_label_values(&[&self.backend, status])
            .inc();
    }
}

impl Drop for DispatchTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.observe("cancelled");
        }
    }
}

/// Record an admission outcome.
pub fn record_admission(outcome: &str) {
    ADMISSIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a priority refresh attempt; `entries` is set on success.
pub fn record_priority_refresh(entries: Option<usize>) {
    match entries {
        Some(entries) => {
            PRIORITY_REFRESH_TOTAL.with_label_values(&["success"]).inc();
            PRIORITY_SNAPSHOT_ENTRIES.set(entries as f64);
        }
        None => PRIORITY_REFRESH_TOTAL.with_label_values(&["error"]).inc(),
    }
}

/// Copy scheduler gauges from a stats snapshot.
pub fn observe_scheduler(stats: &SchedulerStats) {
    QUEUE_SIZE.set(stats.queue_depth as f64);
    PENDING_BUNDLES.set(stats.pending_bundles as f64);
    for backend in &stats.backends {
        BACKEND_ACTIVE_REQUESTS
            .with_label_values(&[&backend.address])
            .set(backend.active as f64);
    }
}
