//! Priority resolution for queued dispatch units.
//!
//! The effective priority of a unit is its declared priority, optionally
//! reduced by a value looked up in an externally refreshed
//! [`PrioritySnapshot`]. Lower values rank earlier.
//!
//! The snapshot is owned by an outside refresher; this module only swaps in
//! the latest copy and reads it. A unit whose lookup key is missing from the
//! snapshot keeps its declared priority.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::config::PriorityMode;

/// Priority-related metadata carried by every dispatch unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitMeta {
    /// Declared priority (lower dispatches first)
    pub priority: Option<f64>,
    /// Key used to find an adjustment in the priority snapshot
    pub lookup_key: Option<String>,
}

impl UnitMeta {
    /// Metadata with a declared priority only
    pub fn with_priority(priority: f64) -> Self {
        Self { priority: Some(priority), lookup_key: None }
    }

    /// Attach a snapshot lookup key
    pub fn lookup(mut self, key: impl Into<String>) -> Self {
        self.lookup_key = Some(key.into());
        self
    }
}

/// Immutable mapping from lookup key to adjustment value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrioritySnapshot {
    values: HashMap<String, f64>,
}

impl PrioritySnapshot {
    /// Build a snapshot from key/value pairs
    pub fn new(values: HashMap<String, f64>) -> Self {
        Self { values }
    }

    /// Build a snapshot from JSON records, reading `key_field` and `value_field`
    /// from each one.
    ///
    /// String and numeric keys are both accepted (numbers are stringified so
    /// they match keys read from request bodies). Records missing either
    /// field, or whose value is not numeric, are skipped.
    pub fn from_records(records: &[Value], key_field: &str, value_field: &str) -> Self {
        let values = records
            .iter()
            .filter_map(|record| {
                let key = key_to_string(record.get(key_field)?)?;
                let value = record.get(value_field)?.as_f64()?;
                Some((key, value))
            })
            .collect();
        Self { values }
    }

    /// Adjustment value for `key`
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot has no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Normalize a JSON key (string or number) to the string used for lookups
pub fn key_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Outcome of resolving one unit's priority
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    /// Effective priority, `None` when the unit declared none
    pub effective: Option<f64>,
    /// The snapshot had no entry for the unit's lookup key
    pub lookup_miss: bool,
}

/// Computes effective priorities against the latest snapshot
pub struct PriorityResolver {
    mode: PriorityMode,
    snapshot: RwLock<Arc<PrioritySnapshot>>,
}

impl PriorityResolver {
    /// Create a resolver with an empty snapshot
    pub fn new(mode: PriorityMode) -> Self {
        Self { mode, snapshot: RwLock::new(Arc::new(PrioritySnapshot::default())) }
    }

    /// Configured mode
    pub fn mode(&self) -> PriorityMode {
        self.mode
    }

    /// Replace the snapshot used by subsequent computations
    pub fn replace(&self, snapshot: PrioritySnapshot) {
        let mut current = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(snapshot);
    }

    /// The snapshot as of now
    pub fn snapshot(&self) -> Arc<PrioritySnapshot> {
        let current = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*current)
    }

    /// Resolve a unit against the current snapshot
    pub fn resolve(&self, meta: &UnitMeta) -> Resolved {
        self.resolve_with(&self.snapshot(), meta)
    }

    /// Resolve a unit against a given snapshot.
    ///
    /// A ranking pass takes the snapshot once and resolves every queued unit
    /// against that same copy.
    pub fn resolve_with(&self, snapshot: &PrioritySnapshot, meta: &UnitMeta) -> Resolved {
        let declared = meta.priority;
        if !self.mode.uses_snapshot() {
            return Resolved { effective: declared, lookup_miss: false };
        }

        let Some(key) = meta.lookup_key.as_deref() else {
            return Resolved { effective: declared, lookup_miss: false };
        };

        match (declared, snapshot.get(key)) {
            (Some(p), Some(adjustment)) => {
                Resolved { effective: Some(p - adjustment), lookup_miss: false }
            }
            (declared, None) => {
                debug!(key = %key, "Priority lookup miss, using declared priority");
                Resolved { effective: declared, lookup_miss: true }
            }
            (None, Some(_)) => Resolved { effective: None, lookup_miss: false },
        }
    }
}
