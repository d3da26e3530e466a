//! Metrics module for the surge proxy
//!
//! Provides Prometheus metrics for monitoring and observability.

pub mod prometheus;

pub use prometheus::{
    encode_metrics, observe_scheduler, record_admission, record_priority_refresh,
    register_metrics, DispatchTimer,
};
