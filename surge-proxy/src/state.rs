//! Application state for the surge proxy.

use surge_core::Scheduler;
use tokio::sync::Mutex;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::transport::BackendTransport;

/// Application state shared across all handlers
pub struct AppState {
    /// Admission scheduler
    pub scheduler: Scheduler,

    /// Backend HTTP client
    pub transport: BackendTransport,

    /// Runtime statistics
    pub stats: Mutex<ProxyStats>,

    /// Configuration
    pub config: ProxyConfig,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let scheduler = Scheduler::new(config.scheduler_config())
            .map_err(|e| ProxyError::Internal(e.to_string()))?;
        let transport = BackendTransport::new(config.scheme(), config.request_timeout())?;

        Ok(Self { scheduler, transport, stats: Mutex::new(ProxyStats::default()), config })
    }
}

/// Runtime statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProxyStats {
    /// Total requests received
    pub requests_total: u64,

    /// Requests answered with a backend response
    pub requests_success: u64,

    /// Backend calls that failed in transport
    pub requests_failed: u64,

    /// Requests refused at admission
    pub requests_rejected: u64,

    /// Requests discarded before dispatch
    pub requests_dropped: u64,
}

impl ProxyStats {
    /// Calculate success rate over completed requests
    pub fn success_rate(&self) -> f64 {
        let completed = self.requests_success + self.requests_failed + self.requests_dropped;
        if completed == 0 {
            1.0
        } else {
            self.requests_success as f64 / completed as f64
        }
    }

    /// Account for a finished request
    pub fn record(&mut self, outcome: Result<(), &ProxyError>) {
        match outcome {
            Ok(()) => self.requests_success += 1,
            Err(ProxyError::Transport(_)) => self.requests_failed += 1,
            Err(ProxyError::Dropped(_)) => self.requests_dropped += 1,
            Err(_) => self.requests_rejected += 1,
        }
    }
}
