//! HTTP route handlers for the surge proxy.
//!
//! This module organizes all route handlers:
//! - `health`: Health check and metrics endpoints
//! - `admit`: Admission of every other request into the scheduler

pub mod admit;
pub mod health;

pub use admit::admit;
pub use health::{health, live, metrics, metrics_prometheus};
