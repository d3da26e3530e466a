//! Health check and metrics endpoints.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::metrics;
use crate::state::AppState;

/// Health check endpoint
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.scheduler.stats();
    Json(json!({
        "status": "healthy",
        "backends": stats.backends.len(),
        "active": stats.active(),
        "queued": stats.queue_depth,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Metrics endpoint with proxy and scheduler statistics
///
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let proxy = *state.stats.lock().await;
    let scheduler = state.scheduler.stats();
    let config = state.scheduler.config();

    Json(json!({
        "proxy": {
            "requests_total": proxy.requests_total,
            "requests_success": proxy.requests_success,
            "requests_failed": proxy.requests_failed,
            "requests_rejected": proxy.requests_rejected,
            "requests_dropped": proxy.requests_dropped,
            "success_rate": proxy.success_rate()
        },
        "scheduler": {
            "config": {
                "max_requests_per_backend": config.max_requests_per_backend,
                "debounce_ms": config.debounce.as_millis() as u64,
                "selection": config.selection,
                "priority": config.priority,
                "bundle_ttl_secs": config.bundle_ttl.map(|ttl| ttl.as_secs())
            },
            "current": scheduler
        }
    }))
}

/// Prometheus text exposition
///
/// GET /metrics/prometheus
pub async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::observe_scheduler(&state.scheduler.stats());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}

/// Live check (for Kubernetes)
///
/// GET /live
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}
