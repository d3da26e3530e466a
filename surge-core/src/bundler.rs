//! Bundle assembly.
//!
//! Members sharing a bundle key are buffered until the declared size is
//! reached; the completed bundle leaves as one composite [`DispatchUnit`]
//! that runs every member against the same backend.
//!
//! Ordering inside a bundle:
//! - a member with an order key is inserted before the first buffered member
//!   carrying a larger key (stable: equal keys keep arrival order)
//! - a member without an order key is appended at the end

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::queue::DispatchUnit;

/// Bundle membership of an admitted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleTag {
    /// Caller-supplied bundle identifier
    pub key: String,
    /// Position of this member inside the bundle
    pub order: Option<i64>,
    /// Number of members the bundle will have once complete
    pub size: usize,
}

impl BundleTag {
    pub fn new(key: impl Into<String>, order: Option<i64>, size: usize) -> Self {
        Self { key: key.into(), order, size }
    }
}

/// A bundle still waiting for members
struct PendingBundle {
    size: usize,
    members: Vec<(Option<i64>, DispatchUnit)>,
    created_at: Instant,
}

impl PendingBundle {
    fn insert(&mut self, order: Option<i64>, unit: DispatchUnit) {
        let position = match order {
            Some(order) => self
                .members
                .iter()
                .position(|(existing, _)| matches!(existing, Some(e) if *e > order))
                .unwrap_or(self.members.len()),
            None => self.members.len(),
        };
        self.members.insert(position, (order, unit));
    }
}

/// Result of offering one member to the bundler
#[derive(Debug)]
pub enum BundleProgress {
    /// The member was buffered; the bundle still needs more
    Pending { received: usize, size: usize },
    /// The bundle is complete and has been removed from the active set
    Complete(DispatchUnit),
}

/// Evicted bundle, reported so callers can log or count it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedBundle {
    pub key: String,
    pub received: usize,
    pub size: usize,
}

/// Active bundles keyed by bundle identifier
#[derive(Default)]
pub struct Bundler {
    pending: HashMap<String, PendingBundle>,
}

impl Bundler {
    /// Create an empty bundler
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member; returns the composite unit when the bundle completes.
    ///
    /// The size declared by the first member is authoritative. `tag.size`
    /// must be at least 1 (validated at admission).
    pub fn submit(&mut self, tag: BundleTag, unit: DispatchUnit) -> BundleProgress {
        let bundle = self.pending.entry(tag.key.clone()).or_insert_with(|| PendingBundle {
            size: tag.size,
            members: Vec::with_capacity(tag.size),
            created_at: Instant::now(),
        });
        if bundle.size != tag.size {
            debug!(
                bundle = %tag.key,
                declared = tag.size,
                expected = bundle.size,
                "Bundle member declared a different size, keeping the first"
            );
        }

        bundle.insert(tag.order, unit);
        let received = bundle.members.len();
        let size = bundle.size;

        if received < size {
            debug!(bundle = %tag.key, received, size, "Bundle member buffered");
            return BundleProgress::Pending { received, size };
        }

        let bundle = match self.pending.remove(&tag.key) {
            Some(bundle) => bundle,
            None => return BundleProgress::Pending { received, size },
        };
        info!(bundle = %tag.key, size, "Bundle complete");
        let members = bundle.members.into_iter().map(|(_, unit)| unit).collect();
        BundleProgress::Complete(DispatchUnit::composite(tag.key, members))
    }

    /// Remove bundles whose first member arrived more than `ttl` ago.
    ///
    /// Dropping the evicted members drops their handlers without running them.
    pub fn evict_older_than(&mut self, ttl: Duration) -> Vec<EvictedBundle> {
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, bundle)| bundle.created_at.elapsed() >= ttl)
            .map(|(key, _)| key.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|key| {
                let bundle = self.pending.remove(&key)?;
                Some(EvictedBundle { key, received: bundle.members.len(), size: bundle.size })
            })
            .collect()
    }

    /// Drop every pending bundle, returning how many were removed
    pub fn reset(&mut self) -> usize {
        let removed = self.pending.len();
        self.pending.clear();
        removed
    }

    /// Number of bundles waiting for members
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Members received so far for `key`
    pub fn received(&self, key: &str) -> Option<usize> {
        self.pending.get(key).map(|bundle| bundle.members.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Backend, BackendId};
    use crate::priority::UnitMeta;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn member(log: &Log, label: &'static str) -> DispatchUnit {
        let log = Arc::clone(log);
        DispatchUnit::new(UnitMeta::default(), move |_| async move {
            log.lock().unwrap().push(label);
        })
    }

    fn backend() -> Backend {
        Backend { id: BackendId(1), address: "10.0.0.1:80".to_string() }
    }

    #[tokio::test]
    async fn test_members_run_in_order_key_order() {
        let log = Log::default();
        let mut bundler = Bundler::new();

        for (order, label) in [(2, "two"), (0, "zero")] {
            let progress = bundler.submit(BundleTag::new("B", Some(order), 3), member(&log, label));
            assert!(matches!(progress, BundleProgress::Pending { size: 3, .. }));
        }

        let progress = bundler.submit(BundleTag::new("B", Some(1), 3), member(&log, "one"));
        let BundleProgress::Complete(unit) = progress else {
            panic!("bundle should complete on the third member");
        };
        unit.dispatch(backend()).await;

        assert_eq!(*log.lock().unwrap(), vec!["zero", "one", "two"]);
    }

    #[test]
    fn test_incomplete_bundle_produces_nothing() {
        let log = Log::default();
        let mut bundler = Bundler::new();

        let first = bundler.submit(BundleTag::new("B", Some(0), 3), member(&log, "a"));
        let second = bundler.submit(BundleTag::new("B", Some(1), 3), member(&log, "b"));

        assert!(matches!(first, BundleProgress::Pending { received: 1, size: 3 }));
        assert!(matches!(second, BundleProgress::Pending { received: 2, size: 3 }));
        assert_eq!(bundler.pending(), 1);
        assert_eq!(bundler.received("B"), Some(2));
    }

    #[test]
    fn test_key_reusable_after_completion() {
        let log = Log::default();
        let mut bundler = Bundler::new();

        bundler.submit(BundleTag::new("B", None, 2), member(&log, "a"));
        let done = bundler.submit(BundleTag::new("B", None, 2), member(&log, "b"));
        assert!(matches!(done, BundleProgress::Complete(ref u) if u.len() == 2));
        assert_eq!(bundler.pending(), 0);

        let again = bundler.submit(BundleTag::new("B", None, 2), member(&log, "c"));
        assert!(matches!(again, BundleProgress::Pending { received: 1, size: 2 }));
    }

    #[tokio::test]
    async fn test_unordered_members_append() {
        let log = Log::default();
        let mut bundler = Bundler::new();

        bundler.submit(BundleTag::new("B", Some(5), 4), member(&log, "five"));
        bundler.submit(BundleTag::new("B", None, 4), member(&log, "loose"));
        bundler.submit(BundleTag::new("B", Some(1), 4), member(&log, "one"));
        let BundleProgress::Complete(unit) =
            bundler.submit(BundleTag::new("B", Some(9), 4), member(&log, "nine"))
        else {
            panic!("bundle should complete");
        };
        unit.dispatch(backend()).await;

        assert_eq!(*log.lock().unwrap(), vec!["one", "five", "loose", "nine"]);
    }

    #[test]
    fn test_size_one_completes_immediately() {
        let log = Log::default();
        let mut bundler = Bundler::new();
        let progress = bundler.submit(BundleTag::new("solo", None, 1), member(&log, "a"));
        assert!(matches!(progress, BundleProgress::Complete(_)));
    }

    #[test]
    fn test_first_declared_size_wins() {
        let log = Log::default();
        let mut bundler = Bundler::new();
        bundler.submit(BundleTag::new("B", None, 3), member(&log, "a"));
        let progress = bundler.submit(BundleTag::new("B", None, 2), member(&log, "b"));
        assert!(matches!(progress, BundleProgress::Pending { received: 2, size: 3 }));
    }

    #[test]
    fn test_evict_and_reset() {
        let log = Log::default();
        let mut bundler = Bundler::new();
        bundler.submit(BundleTag::new("old", None, 3), member(&log, "a"));

        assert!(bundler.evict_older_than(Duration::from_secs(3600)).is_empty());
        let evicted = bundler.evict_older_than(Duration::ZERO);
        assert_eq!(evicted, vec![EvictedBundle { key: "old".to_string(), received: 1, size: 3 }]);
        assert_eq!(bundler.pending(), 0);

        bundler.submit(BundleTag::new("x", None, 2), member(&log, "b"));
        bundler.submit(BundleTag::new("y", None, 2), member(&log, "c"));
        assert_eq!(bundler.reset(), 2);
        assert!(log.lock().unwrap().is_empty());
    }
}
