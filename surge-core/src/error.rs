//! Error types for the surge scheduling engine
//!
//! This module provides structured error types using `thiserror` for
//! type-safe error handling across the library.
//!
//! # Error Hierarchy
//!
//! ```text
//! surge_core errors
//! ├── AdmissionError - a submission was rejected before entering the queue
//! └── ConfigError    - the scheduler configuration is unusable
//! ```
//!
//! Conditions that are *not* errors: every backend being at its ceiling
//! (units stay queued), a priority lookup miss (falls back to the declared
//! priority), and a bundle still waiting for members.

use thiserror::Error;

/// Reasons a submission is rejected at the admission boundary.
///
/// A rejected admission never touches the queue, the bundle map or the
/// backend counters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    /// Priority mode is enabled but the unit carries no declared priority
    #[error("priority mode is enabled but no priority value was supplied")]
    MissingPriority,

    /// External priority adjustment is enabled but the unit has no lookup key
    #[error("external priority adjustment is enabled but no lookup key was supplied")]
    MissingLookupKey,

    /// Bundle member declared a size that can never complete
    #[error("bundle '{key}' declared invalid size {size}")]
    InvalidBundleSize { key: String, size: usize },
}

impl AdmissionError {
    /// Create an invalid bundle size error
    pub fn bundle_size(key: impl Into<String>, size: usize) -> Self {
        Self::InvalidBundleSize { key: key.into(), size }
    }
}

/// Errors raised when validating a [`crate::SchedulerConfig`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No backend addresses were configured
    #[error("at least one backend address is required")]
    NoBackends,

    /// A ceiling of zero would leave every unit queued forever
    #[error("max requests per backend must be at least 1")]
    ZeroCapacity,

    /// A backend address is empty
    #[error("backend #{index} has an empty address")]
    EmptyAddress { index: usize },
}
