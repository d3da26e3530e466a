//! Surge Core Library
//!
//! Admission control and reverse dispatch for a pool of interchangeable
//! backends. Incoming units of work are held in an admission queue and handed
//! out to the least loaded backend that still has capacity, in bursts
//! coalesced by a short debounce window.
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────────┐   ┌─────────────┐
//! │ submit() │──►│ Bundler  │──►│ AdmissionQueue │──►│ BackendPool │──► handler
//! └──────────┘   └──────────┘   └────────────────┘   └─────────────┘
//!                                        ▲
//!                                PriorityResolver
//!                              (snapshot refreshed
//!                                  externally)
//! ```
//!
//! The engine is transport agnostic: a [`DispatchUnit`] carries an async
//! handler that receives the chosen [`Backend`] and performs the actual call.

pub mod bundler;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod priority;
pub mod queue;
pub mod scheduler;

pub use bundler::{BundleProgress, BundleTag, Bundler, EvictedBundle};
pub use config::{PriorityMode, SchedulerConfig, SelectionPolicy};
pub use error::{AdmissionError, ConfigError};
pub use metrics::{SchedulerMetrics, SchedulerStats};
pub use pool::{Backend, BackendId, BackendLoad, BackendPool};
pub use priority::{key_to_string, PriorityResolver, PrioritySnapshot, Resolved, UnitMeta};
pub use queue::{AdmissionQueue, DispatchUnit, Handler, Taken};
pub use scheduler::{Admitted, Scheduler};
