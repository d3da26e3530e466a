//! Configuration for the scheduling engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How the backend pool chooses among backends below their ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Smallest active count wins; ties go to the lowest index
    #[default]
    LowestLoad,
    /// Uniform random choice among every backend sharing the smallest active count
    LowestLoadRandomized,
}

/// Whether queued units are ranked by priority, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityMode {
    /// Plain FIFO; declared priorities are ignored
    #[default]
    Disabled,
    /// Rank by the declared priority only
    Declared,
    /// Rank by declared priority minus the value found in the external snapshot
    External,
}

impl PriorityMode {
    /// Whether ranking by priority is active at all
    pub fn is_enabled(self) -> bool {
        !matches!(self, PriorityMode::Disabled)
    }

    /// Whether the external snapshot adjusts the declared priority
    pub fn uses_snapshot(self) -> bool {
        matches!(self, PriorityMode::External)
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Backend addresses (`host:port`); a backend's identity is its index here
    pub backends: Vec<String>,

    /// Ceiling on in-flight dispatches per backend, shared by all backends
    pub max_requests_per_backend: usize,

    /// Coalescing window between the first enqueue of a burst and the pass it triggers
    pub debounce: Duration,

    /// Backend selection policy
    pub selection: SelectionPolicy,

    /// Priority ranking mode
    pub priority: PriorityMode,

    /// Pending bundles older than this are evicted by
    /// [`crate::Scheduler::evict_stale_bundles`]. `None` keeps them forever.
    pub bundle_ttl: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backends: vec!["localhost:8080".to_string()],
            max_requests_per_backend: 1,
            debounce: Duration::from_millis(50),
            selection: SelectionPolicy::LowestLoad,
            priority: PriorityMode::Disabled,
            bundle_ttl: None,
        }
    }
}

impl SchedulerConfig {
    /// Create a config for the given backends with default settings
    pub fn with_backends<I, S>(backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { backends: backends.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    /// Create config optimized for low latency (short window, one request per backend)
    pub fn low_latency(backends: Vec<String>) -> Self {
        Self {
            backends,
            max_requests_per_backend: 1,
            debounce: Duration::from_millis(5),
            ..Self::default()
        }
    }

    /// Create config optimized for high throughput (wider window, randomized spreading)
    pub fn high_throughput(backends: Vec<String>) -> Self {
        Self {
            backends,
            max_requests_per_backend: 8,
            debounce: Duration::from_millis(100),
            selection: SelectionPolicy::LowestLoadRandomized,
            ..Self::default()
        }
    }

    /// Check that the configuration can make progress
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        if self.max_requests_per_backend == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if let Some(index) = self.backends.iter().position(|b| b.trim().is_empty()) {
            return Err(ConfigError::EmptyAddress { index });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_requests_per_backend, 1);
        assert_eq!(config.selection, SelectionPolicy::LowestLoad);
        assert!(!config.priority.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let backends = vec!["a:1".to_string(), "b:2".to_string()];
        let low = SchedulerConfig::low_latency(backends.clone());
        assert_eq!(low.max_requests_per_backend, 1);

        let high = SchedulerConfig::high_throughput(backends);
        assert_eq!(high.max_requests_per_backend, 8);
        assert_eq!(high.selection, SelectionPolicy::LowestLoadRandomized);
    }

    #[test]
    fn test_validate() {
        let config = SchedulerConfig { backends: vec![], ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::NoBackends));

        let config = SchedulerConfig { max_requests_per_backend: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));

        let config = SchedulerConfig::with_backends(["a:1", " "]);
        assert_eq!(config.validate(), Err(ConfigError::EmptyAddress { index: 1 }));
    }

    #[test]
    fn test_priority_mode_flags() {
        assert!(PriorityMode::Declared.is_enabled());
        assert!(!PriorityMode::Declared.uses_snapshot());
        assert!(PriorityMode::External.uses_snapshot());
    }

    #[test]
    fn test_policy_deserialize() {
        let policy: SelectionPolicy = serde_json::from_str("\"lowest_load_randomized\"").unwrap();
        assert_eq!(policy, SelectionPolicy::LowestLoadRandomized);
    }
}
