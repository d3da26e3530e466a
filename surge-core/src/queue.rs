//! Dispatch units and the admission queue.
//!
//! A [`DispatchUnit`] is either a single admitted request or an assembled
//! bundle; both expose the same contract: given a backend, run to completion.
//! The [`AdmissionQueue`] holds units that have not been assigned a backend
//! slot yet.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};

use crate::pool::Backend;
use crate::priority::{PriorityResolver, UnitMeta};

/// Completion handler of a single request.
///
/// Invoked with the chosen backend; resolves once the backend call has
/// finished or failed. Failures are reported to the caller by the handler
/// itself, never to the scheduler.
pub type Handler = Box<dyn FnOnce(Backend) -> BoxFuture<'static, ()> + Send>;

/// What a unit dispatches
pub enum UnitKind {
    /// One admitted request
    Single(Handler),
    /// An assembled bundle; members run sequentially in this order
    Bundle { key: String, members: Vec<Handler> },
}

/// The schedulable item: one request or one assembled bundle
pub struct DispatchUnit {
    /// Identifier assigned at admission (0 until then)
    pub id: u64,
    /// Declared priority and lookup key
    pub meta: UnitMeta,
    /// When the unit entered the queue; construction time until then
    pub enqueued_at: Instant,
    kind: UnitKind,
}

impl DispatchUnit {
    /// Create a single-request unit from an async handler
    pub fn new<F, Fut>(meta: UnitMeta, handler: F) -> Self
    where
        F: FnOnce(Backend) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Box::new(move |backend| handler(backend).boxed());
        Self { id: 0, meta, enqueued_at: Instant::now(), kind: UnitKind::Single(handler) }
    }

    /// Combine bundle members into one composite unit.
    ///
    /// The composite inherits the metadata of the first member.
    pub(crate) fn composite(key: String, members: Vec<DispatchUnit>) -> Self {
        let meta = members.first().map(|m| m.meta.clone()).unwrap_or_default();
        let mut handlers = Vec::with_capacity(members.len());
        for member in members {
            match member.kind {
                UnitKind::Single(handler) => handlers.push(handler),
                UnitKind::Bundle { members, .. } => handlers.extend(members),
            }
        }
        Self {
            id: 0,
            meta,
            enqueued_at: Instant::now(),
            kind: UnitKind::Bundle { key, members: handlers },
        }
    }

    /// Number of requests this unit will run
    pub fn len(&self) -> usize {
        match &self.kind {
            UnitKind::Single(_) => 1,
            UnitKind::Bundle { members, .. } => members.len(),
        }
    }

    /// Whether the unit runs no request at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bundle key, if this is a composite unit
    pub fn bundle_key(&self) -> Option<&str> {
        match &self.kind {
            UnitKind::Single(_) => None,
            UnitKind::Bundle { key, .. } => Some(key),
        }
    }

    /// Time spent waiting since the unit was queued
    pub fn wait_time(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Run the unit against `backend`, waiting for every member to finish
    pub async fn dispatch(self, backend: Backend) {
        match self.kind {
            UnitKind::Single(handler) => handler(backend).await,
            UnitKind::Bundle { members, .. } => {
                for handler in members {
                    handler(backend.clone()).await;
                }
            }
        }
    }
}

impl fmt::Debug for DispatchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchUnit")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .field("bundle", &self.bundle_key())
            .field("len", &self.len())
            .finish()
    }
}

/// A unit removed from the queue together with ranking diagnostics
#[derive(Debug)]
pub struct Taken {
    pub unit: DispatchUnit,
    /// Lookup misses encountered while ranking the queue
    pub lookup_misses: usize,
}

/// Ordered collection of units awaiting a backend
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    units: VecDeque<DispatchUnit>,
}

impl AdmissionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit, stamping its queue entry time
    pub fn push(&mut self, mut unit: DispatchUnit) {
        unit.enqueued_at = Instant::now();
        self.units.push_back(unit);
    }

    /// Remove the next unit to dispatch.
    ///
    /// With priority ranking disabled this is the head of the queue.
    /// Otherwise every queued unit is resolved against one snapshot and the
    /// lowest effective priority wins; ties and units without a priority
    /// keep admission order, and units without a priority rank last.
    pub fn take_next(&mut self, resolver: &PriorityResolver) -> Option<Taken> {
        if !resolver.mode().is_enabled() {
            return self.units.pop_front().map(|unit| Taken { unit, lookup_misses: 0 });
        }

        let snapshot = resolver.snapshot();
        let mut lookup_misses = 0;
        let mut best: Option<(usize, f64)> = None;
        for (index, unit) in self.units.iter().enumerate() {
            let resolved = resolver.resolve_with(&snapshot, &unit.meta);
            if resolved.lookup_miss {
                lookup_misses += 1;
            }
            let rank = resolved.effective.unwrap_or(f64::INFINITY);
            match best {
                Some((_, best_rank)) if rank.total_cmp(&best_rank).is_ge() => {}
                _ => best = Some((index, rank)),
            }
        }

        let (index, _) = best?;
        self.units.remove(index).map(|unit| Taken { unit, lookup_misses })
    }

    /// Number of queued units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Drop every queued unit, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.units.len();
        self.units.clear();
        removed
    }
}
