//! Delta tracking over pre-aggregated counters.
//!
//! Host- and service-level counters arrive already summed across pods, so a
//! single pod restart only dents the total. This tracker therefore uses
//! [`ResetPolicy::CurrentAsDelta`] by default, while the per-entity
//! [`DeltaEngine`](crate::metrics::delta::DeltaEngine) skips resets.

use crate::metrics::rate::{counter_delta, ResetPolicy};
use ahash::AHashMap;
use std::hash::Hash;

/// Tracks the previous cumulative value of pre-aggregated counters
#[derive(Debug)]
pub struct SnapshotDeltaTracker<K> {
    policy: ResetPolicy,
    previous: AHashMap<K, f64>,
    resets: u64,
}

impl<K> Default for SnapshotDeltaTracker<K> {
    fn default() -> Self {
        Self::with_policy(ResetPolicy::CurrentAsDelta)
    }
}

impl<K> SnapshotDeltaTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ResetPolicy) -> Self {
        Self {
            policy,
            previous: AHashMap::new(),
            resets: 0,
        }
    }

    pub fn policy(&self) -> ResetPolicy {
        self.policy
    }

    /// Resets seen since construction
    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

impl<K: Hash + Eq + Clone> SnapshotDeltaTracker<K> {
    pub fn previous(&self, key: &K) -> Option<f64> {
        self.previous.get(key).copied()
    }

    /// Diff one snapshot against the previous one.
    ///
    /// Duplicate keys are summed first. Keys seen for the first time yield
    /// nothing; keys missing from `current` are forgotten.
    pub fn advance<I>(&mut self, current: I) -> AHashMap<K, f64>
    where
        I: IntoIterator<Item = (K, f64)>,
    {
        let mut merged: AHashMap<K, f64> = AHashMap::new();
        for (key, value) in current {
            if value.is_finite() {
                *merged.entry(key).or_insert(0.0) += value;
            }
        }

        let mut deltas = AHashMap::with_capacity(merged.len());
        for (key, value) in &merged {
            let Some(prev) = self.previous.get(key) else {
                continue;
            };
            if *value < *prev {
                self.resets += 1;
            }
            if let Some(delta) = counter_delta(*value, *prev, self.policy) {
                deltas.insert(key.clone(), delta);
            }
        }

        self.previous = merged;
        deltas
    }
}
