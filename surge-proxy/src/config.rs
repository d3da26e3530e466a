//! Proxy configuration.
//!
//! Loaded from a JSON file with camelCase keys, then optionally overridden by
//! `SURGE_*` environment variables:
//!
//! ```json
//! {
//!   "destinationServers": ["10.0.0.1:8080", "10.0.0.2:8080"],
//!   "maxRequestsPerServer": 2,
//!   "debounceMs": 50,
//!   "randomizeTies": true,
//!   "routesPrefix": "/_surge",
//!   "priority": {
//!     "enabled": true,
//!     "field": "priority",
//!     "lookup": { "url": "http://scores/api", "requestField": "user", "keyField": "id", "valueField": "score" }
//!   },
//!   "bundle": { "idField": "bundleId", "orderField": "bundleOrder", "sizeField": "bundleSize" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use surge_core::{PriorityMode, SchedulerConfig, SelectionPolicy};

/// Top-level proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    /// Backend addresses (`host:port`)
    pub destination_servers: Vec<String>,

    /// Concurrency ceiling applied to every backend
    pub max_requests_per_server: usize,

    /// Debounce window in milliseconds
    pub debounce_ms: u64,

    /// Break load ties at random instead of by list order
    pub randomize_ties: bool,

    /// Talk to backends over https
    pub use_https: bool,

    /// Port to listen on
    pub port: u16,

    /// Largest accepted request body
    pub body_limit_bytes: usize,

    /// Timeout for a single backend call
    pub request_timeout_secs: u64,

    /// Path prefix for the health and metrics routes, e.g. `/_surge`.
    /// Empty serves them at the root, where they shadow backend paths.
    pub routes_prefix: String,

    /// Priority ranking
    pub priority: PriorityConfig,

    /// Bundle field names and eviction
    pub bundle: BundleConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            destination_servers: Vec::new(),
            max_requests_per_server: 1,
            debounce_ms: 50,
            randomize_ties: false,
            use_https: false,
            port: 1234,
            body_limit_bytes: 500 * 1024 * 1024,
            request_timeout_secs: 300,
            routes_prefix: String::new(),
            priority: PriorityConfig::default(),
            bundle: BundleConfig::default(),
        }
    }
}

/// Priority ranking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriorityConfig {
    /// Rank queued requests by priority instead of arrival order
    pub enabled: bool,

    /// Request body field holding the declared priority
    pub field: String,

    /// External adjustment source; absent means declared priorities only
    pub lookup: Option<LookupConfig>,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self { enabled: false, field: "priority".to_string(), lookup: None }
    }
}

/// Where and how to fetch the priority snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupConfig {
    /// Endpoint returning a JSON array of records
    pub url: String,

    /// Request body field whose value is looked up
    pub request_field: String,

    /// Record field matched against the request value
    pub key_field: String,

    /// Record field subtracted from the declared priority
    pub value_field: String,

    /// Refresh interval in milliseconds
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
}

fn default_refresh_ms() -> u64 {
    1000
}

impl LookupConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }
}

/// Bundle request fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BundleConfig {
    pub id_field: String,
    pub order_field: String,
    pub size_field: String,

    /// Evict bundles still incomplete after this many seconds
    pub ttl_secs: Option<u64>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            id_field: "bundleId".to_string(),
            order_field: "bundleOrder".to_string(),
            size_field: "bundleSize".to_string(),
            ttl_secs: None,
        }
    }
}

impl ProxyConfig {
    /// Read and parse a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        serde_json::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Apply `SURGE_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(port) = lookup("SURGE_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(n) = lookup("SURGE_MAX_REQUESTS_PER_SERVER").and_then(|v| v.parse().ok()) {
            self.max_requests_per_server = n;
        }
        if let Some(ms) = lookup("SURGE_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
            self.debounce_ms = ms;
        }
        if let Some(flag) = lookup("SURGE_RANDOMIZE_TIES") {
            self.randomize_ties = parse_flag(&flag);
        }
        if let Some(flag) = lookup("SURGE_USE_HTTPS") {
            self.use_https = parse_flag(&flag);
        }
        if let Some(prefix) = lookup("SURGE_ROUTES_PREFIX") {
            self.routes_prefix = prefix;
        }
        self
    }

    /// Priority mode implied by the `priority` section
    pub fn priority_mode(&self) -> PriorityMode {
        match (self.priority.enabled, &self.priority.lookup) {
            (false, _) => PriorityMode::Disabled,
            (true, None) => PriorityMode::Declared,
            (true, Some(_)) => PriorityMode::External,
        }
    }

    /// Scheduler configuration derived from this config
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            backends: self.destination_servers.clone(),
            max_requests_per_backend: self.max_requests_per_server,
            debounce: Duration::from_millis(self.debounce_ms),
            selection: if self.randomize_ties {
                SelectionPolicy::LowestLoadRandomized
            } else {
                SelectionPolicy::LowestLoad
            },
            priority: self.priority_mode(),
            bundle_ttl: self.bundle.ttl_secs.map(Duration::from_secs),
        }
    }

    /// URL scheme used for backend calls
    pub fn scheme(&self) -> &'static str {
        if self.use_https {
            "https"
        } else {
            "http"
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler_config().validate()?;

        if self.body_limit_bytes == 0 {
            return Err(ConfigError::ZeroValue { name: "bodyLimitBytes" });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue { name: "requestTimeoutSecs" });
        }
        if self.bundle.ttl_secs == Some(0) {
            return Err(ConfigError::ZeroValue { name: "bundle.ttlSecs" });
        }
        let prefix = &self.routes_prefix;
        if !prefix.is_empty()
            && (!prefix.starts_with('/') || prefix.ends_with('/') || prefix.contains(['*', ':']))
        {
            return Err(ConfigError::RoutesPrefix(prefix.clone()));
        }

        let mut fields = vec![
            ("priority.field", &self.priority.field),
            ("bundle.idField", &self.bundle.id_field),
            ("bundle.orderField", &self.bundle.order_field),
            ("bundle.sizeField", &self.bundle.size_field),
        ];
        if let Some(lookup) = &self.priority.lookup {
            if lookup.refresh_ms == 0 {
                return Err(ConfigError::ZeroValue { name: "priority.lookup.refreshMs" });
            }
            fields.extend([
                ("priority.lookup.url", &lookup.url),
                ("priority.lookup.requestField", &lookup.request_field),
                ("priority.lookup.keyField", &lookup.key_field),
                ("priority.lookup.valueField", &lookup.value_field),
            ]);
        }
        if let Some((name, _)) = fields.into_iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::EmptyField { name });
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("Invalid scheduler settings: {0}")]
    Scheduler(#[from] surge_core::ConfigError),

    #[error("{name} must be greater than zero")]
    ZeroValue { name: &'static str },

    #[error("{name} must not be empty")]
    EmptyField { name: &'static str },

    #[error("routesPrefix '{0}' must look like '/name' and hold no wildcards")]
    RoutesPrefix(String),
}
