//! Backend pool with per-backend active counters.
//!
//! Selection and reservation are separate steps: [`BackendPool::select`]
//! only reads the counters, the caller then calls [`BackendPool::reserve`].
//! The scheduler performs both under one lock so no other pass can observe
//! the count in between.

use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::config::SelectionPolicy;

/// Index of a backend in the configured address list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BackendId(pub usize);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The backend a dispatch unit was assigned to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub id: BackendId,
    pub address: String,
}

/// Load of a single backend at snapshot time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendLoad {
    pub address: String,
    pub active: usize,
}

/// Fixed set of backends and their active-request counters
pub struct BackendPool {
    addresses: Vec<String>,
    active: Vec<usize>,
    max_per_backend: usize,
    policy: SelectionPolicy,
    rng: StdRng,
}

impl BackendPool {
    /// Create a pool with all counters at zero
    pub fn new(addresses: Vec<String>, max_per_backend: usize, policy: SelectionPolicy) -> Self {
        Self::with_rng(addresses, max_per_backend, policy, StdRng::from_entropy())
    }

    /// Create a pool with a deterministic random source
    pub fn with_seed(
        addresses: Vec<String>,
        max_per_backend: usize,
        policy: SelectionPolicy,
        seed: u64,
    ) -> Self {
        Self::with_rng(addresses, max_per_backend, policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        addresses: Vec<String>,
        max_per_backend: usize,
        policy: SelectionPolicy,
        rng: StdRng,
    ) -> Self {
        let active = vec![0; addresses.len()];
        Self { addresses, active, max_per_backend, policy, rng }
    }

    /// Pick an available backend, or `None` when every backend is at its ceiling.
    ///
    /// Does not change any counter.
    pub fn select(&mut self) -> Option<BackendId> {
        let min = self.active.iter().copied().filter(|&n| n < self.max_per_backend).min()?;

        match self.policy {
            SelectionPolicy::LowestLoad => {
                self.active.iter().position(|&n| n == min).map(BackendId)
            }
            SelectionPolicy::LowestLoadRandomized => {
                let candidates: Vec<usize> = self
                    .active
                    .iter()
                    .enumerate()
                    .filter(|&(_, &n)| n == min)
                    .map(|(i, _)| i)
                    .collect();
                candidates.choose(&mut self.rng).copied().map(BackendId)
            }
        }
    }

    /// Take a slot on `id`
    pub fn reserve(&mut self, id: BackendId) {
        let count = &mut self.active[id.0];
        debug_assert!(*count < self.max_per_backend, "reserved backend {} past its ceiling", id);
        *count += 1;
    }

    /// Give back a slot on `id`
    pub fn release(&mut self, id: BackendId) {
        let count = &mut self.active[id.0];
        *count = count.saturating_sub(1);
    }

    /// Current active count of a backend
    pub fn active(&self, id: BackendId) -> usize {
        self.active[id.0]
    }

    /// Resolve a backend identity to its address
    pub fn backend(&self, id: BackendId) -> Backend {
        Backend { id, address: self.addresses[id.0].clone() }
    }

    /// Number of backends
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether the pool has no backends
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Sum of all active counters
    pub fn total_active(&self) -> usize {
        self.active.iter().sum()
    }

    /// Per-backend load for monitoring
    pub fn loads(&self) -> Vec<BackendLoad> {
        self.addresses
            .iter()
            .zip(&self.active)
            .map(|(address, &active)| BackendLoad { address: address.clone(), active })
            .collect()
    }
}
