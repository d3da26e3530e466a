//! Debounced dispatch scheduler
//!
//! The [`Scheduler`] owns every piece of mutable scheduling state (backend
//! counters, admission queue, pending bundles) behind one mutex. Admissions
//! enter through [`Scheduler::submit`]; the first admission of a burst opens
//! a debounce window and, once it elapses, a dispatch pass runs as its own
//! task.
//!
//! # Architecture
//!
//! ```text
//!   submit() ──► Bundler ──► AdmissionQueue ──► debounce window
//!                (bundled                         │ (one pass per window)
//!                 members)                        ▼
//!                                         ┌───────────────┐
//!                                         │  dispatch pass │ ◄── loops while
//!                                         └───────┬───────┘     queue non-empty
//!                          select + reserve +     │
//!                          take (one lock)        ▼
//!                                         ┌───────────────┐
//!                                         │  BackendPool   │
//!                                         └───────┬───────┘
//!                                                 ▼
//!                                       unit handler (awaited),
//!                                       then slot release
//! ```
//!
//! A pass dispatches one unit at a time and waits for its handler before
//! selecting again. Throughput across backends comes from several passes
//! running concurrently, each started by a separate debounce window.
//!
//! # Example
//!
//! ```rust
//! use surge_core::{DispatchUnit, Scheduler, SchedulerConfig, UnitMeta};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scheduler = Scheduler::new(SchedulerConfig::with_backends(["127.0.0.1:9000"])).unwrap();
//!
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! let unit = DispatchUnit::new(UnitMeta::default(), move |backend| async move {
//!     let _ = tx.send(backend.address);
//! });
//! scheduler.submit(unit, None).unwrap();
//!
//! assert_eq!(rx.await.unwrap(), "127.0.0.1:9000");
//! # }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::bundler::{BundleProgress, BundleTag, Bundler, EvictedBundle};
use crate::config::SchedulerConfig;
use crate::error::{AdmissionError, ConfigError};
use crate::metrics::{SchedulerMetrics, SchedulerStats};
use crate::pool::{Backend, BackendPool};
use crate::priority::{PriorityResolver, PrioritySnapshot, UnitMeta};
use crate::queue::{AdmissionQueue, DispatchUnit};

/// How a submission was absorbed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admitted {
    /// The unit entered the admission queue
    Queued { unit: u64 },
    /// The unit was buffered in an incomplete bundle
    Buffered { unit: u64, bundle: String, received: usize, size: usize },
    /// The unit completed its bundle; the composite entered the queue
    BundleQueued { unit: u64, composite: u64, bundle: String },
}

/// Mutable state, only touched under the scheduler lock
struct State {
    pool: BackendPool,
    queue: AdmissionQueue,
    bundler: Bundler,
    next_unit_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_unit_id += 1;
        self.next_unit_id
    }
}

struct Shared {
    config: SchedulerConfig,
    state: Mutex<State>,
    resolver: PriorityResolver,
    window_open: AtomicBool,
    metrics: SchedulerMetrics,
}

/// Admission controller and dispatch driver.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler after validating `config`
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = BackendPool::new(
            config.backends.clone(),
            config.max_requests_per_backend,
            config.selection,
        );
        Ok(Self::with_pool(config, pool))
    }

    /// Create a scheduler whose randomized selection is reproducible
    pub fn with_seed(config: SchedulerConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = BackendPool::with_seed(
            config.backends.clone(),
            config.max_requests_per_backend,
            config.selection,
            seed,
        );
        Ok(Self::with_pool(config, pool))
    }

    fn with_pool(config: SchedulerConfig, pool: BackendPool) -> Self {
        let state = State {
            pool,
            queue: AdmissionQueue::new(),
            bundler: Bundler::new(),
            next_unit_id: 0,
        };
        Self {
            shared: Arc::new(Shared {
                resolver: PriorityResolver::new(config.priority),
                config,
                state: Mutex::new(state),
                window_open: AtomicBool::new(false),
                metrics: SchedulerMetrics::new(),
            }),
        }
    }

    /// Admit a unit, optionally as a member of a bundle.
    ///
    /// Must be called from within a tokio runtime: the first admission of a
    /// burst spawns the pass that will dispatch it.
    pub fn submit(
        &self,
        mut unit: DispatchUnit,
        bundle: Option<BundleTag>,
    ) -> Result<Admitted, AdmissionError> {
        if let Err(e) = self.validate(&unit.meta, bundle.as_ref()) {
            self.shared.metrics.record_rejected();
            return Err(e);
        }

        let admitted = {
            let mut state = self.shared.lock_state();
            unit.id = state.next_id();
            let unit_id = unit.id;

            match bundle {
                None => {
                    self.shared.push_locked(&mut state, unit);
                    Admitted::Queued { unit: unit_id }
                }
                Some(tag) => {
                    let key = tag.key.clone();
                    match state.bundler.submit(tag, unit) {
                        BundleProgress::Pending { received, size } => {
                            self.shared.metrics.record_buffered();
                            return Ok(Admitted::Buffered {
                                unit: unit_id,
                                bundle: key,
                                received,
                                size,
                            });
                        }
                        BundleProgress::Complete(mut composite) => {
                            composite.id = state.next_id();
                            let composite_id = composite.id;
                            self.shared.metrics.record_bundle_completed();
                            self.shared.push_locked(&mut state, composite);
                            Admitted::BundleQueued {
                                unit: unit_id,
                                composite: composite_id,
                                bundle: key,
                            }
                        }
                    }
                }
            }
        };

        self.open_window();
        Ok(admitted)
    }

    fn validate(&self, meta: &UnitMeta, bundle: Option<&BundleTag>) -> Result<(), AdmissionError> {
        let mode = self.shared.config.priority;
        if mode.is_enabled() && meta.priority.is_none() {
            return Err(AdmissionError::MissingPriority);
        }
        if mode.uses_snapshot() && meta.lookup_key.is_none() {
            return Err(AdmissionError::MissingLookupKey);
        }
        if let Some(tag) = bundle {
            if tag.size == 0 {
                return Err(AdmissionError::bundle_size(tag.key.clone(), tag.size));
            }
        }
        Ok(())
    }

    /// Open a debounce window unless one is already pending.
    ///
    /// The window flag is cleared right before the pass starts, so admissions
    /// during the delay join the pending pass while later ones open a new window.
    fn open_window(&self) {
        if self.shared.window_open.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(shared.config.debounce).await;
            shared.window_open.store(false, Ordering::SeqCst);
            shared.run_pass().await;
        });
    }

    /// Replace the priority snapshot used for ranking
    pub fn update_priorities(&self, snapshot: PrioritySnapshot) {
        debug!(entries = snapshot.len(), "Priority snapshot replaced");
        self.shared.resolver.replace(snapshot);
    }

    /// Priority snapshot currently used for ranking
    pub fn priority_snapshot(&self) -> Arc<PrioritySnapshot> {
        self.shared.resolver.snapshot()
    }

    /// Evict pending bundles older than the configured TTL.
    ///
    /// Evicted members never run; dropping them drops their handlers.
    pub fn evict_stale_bundles(&self) -> Vec<EvictedBundle> {
        let Some(ttl) = self.shared.config.bundle_ttl else {
            return Vec::new();
        };
        let evicted = self.shared.lock_state().bundler.evict_older_than(ttl);
        for bundle in &evicted {
            warn!(
                bundle = %bundle.key,
                received = bundle.received,
                size = bundle.size,
                "Evicted incomplete bundle"
            );
        }
        self.shared.metrics.record_bundles_evicted(evicted.len());
        evicted
    }

    /// Drop every pending bundle
    pub fn reset_bundles(&self) -> usize {
        let removed = self.shared.lock_state().bundler.reset();
        if removed > 0 {
            info!(removed, "Pending bundles reset");
        }
        self.shared.metrics.record_bundles_evicted(removed);
        removed
    }

    /// Snapshot of queue, bundle and backend state
    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.lock_state();
        SchedulerStats::collect(
            &self.shared.metrics,
            state.queue.len(),
            state.bundler.pending(),
            state.pool.loads(),
        )
    }

    /// Number of units waiting for a backend
    pub fn queue_depth(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    /// Configuration in use
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Raw counters
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.shared.metrics
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_locked(&self, state: &mut State, unit: DispatchUnit) {
        debug!(unit = unit.id, members = unit.len(), "Unit enqueued");
        state.queue.push(unit);
        self.metrics.record_admitted(state.queue.len());
    }

    /// Dispatch queued units one at a time until the queue is empty or no
    /// backend has capacity.
    async fn run_pass(self: Arc<Self>) {
        self.metrics.record_pass();
        debug!(queued = self.lock_state().queue.len(), "Dispatch pass started");

        let mut dispatched = 0usize;
        while let Some((slot, unit)) = self.next_dispatch() {
            let unit_id = unit.id;
            let backend = slot.backend.clone();
            debug!(
                unit = unit_id,
                backend = %backend.id,
                address = %backend.address,
                "Dispatching unit"
            );

            if AssertUnwindSafe(unit.dispatch(backend)).catch_unwind().await.is_err() {
                error!(unit = unit_id, backend = %slot.backend.id, "Dispatch handler panicked");
            }
            drop(slot);
            dispatched += 1;
        }

        debug!(dispatched, "Dispatch pass finished");
    }

    /// Select a backend, reserve a slot on it and take the best-ranked unit,
    /// all under one lock.
    fn next_dispatch(self: &Arc<Self>) -> Option<(SlotGuard, DispatchUnit)> {
        let mut state = self.lock_state();
        if state.queue.is_empty() {
            return None;
        }

        let Some(id) = state.pool.select() else {
            debug!(queued = state.queue.len(), "No backend available, leaving units queued");
            return None;
        };
        state.pool.reserve(id);

        let Some(taken) = state.queue.take_next(&self.resolver) else {
            state.pool.release(id);
            return None;
        };
        self.metrics.record_lookup_misses(taken.lookup_misses);
        self.metrics.record_dispatched(taken.unit.wait_time());

        let backend = state.pool.backend(id);
        drop(state);
        Some((SlotGuard { shared: Arc::clone(self), backend }, taken.unit))
    }
}

/// A reserved backend slot, released when dropped.
///
/// Release happens on every exit path of a dispatch, including a panicking
/// handler and a pass task cancelled at shutdown.
struct SlotGuard {
    shared: Arc<Shared>,
    backend: Backend,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        state.pool.release(self.backend.id);
        debug!(
            backend = %self.backend.id,
            active = state.pool.active(self.backend.id),
            "Backend slot released"
        );
    }
}
