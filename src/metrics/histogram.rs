//! Histogram percentile estimation from bucketed counts.
//!
//! Bucketed histograms only combine by summing raw bucket counts, so all
//! merging happens on [`LatencyHistogram`] before any percentile is taken.

use crate::metrics::rate::finite_or_zero;
use crate::metrics::types::BucketBound;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Percentiles reported for every latency distribution
pub const REPORTED_PERCENTILES: [f64; 4] = [0.50, 0.90, 0.95, 0.99];

/// Estimate the value at percentile `p` (0..1) of a bucketed distribution.
///
/// `bounds` are ascending finite upper bounds; `counts` holds one count per
/// bound plus the trailing `+Inf` bucket. Values inside a bucket are assumed
/// uniformly spread. The `+Inf` bucket reports the last finite bound.
pub fn histogram_percentile(bounds: &[f64], counts: &[u64], p: f64) -> f64 {
    let buckets = &counts[..counts.len().min(bounds.len() + 1)];
    let total: u64 = buckets.iter().fold(0u64, |acc, c| acc.saturating_add(*c));
    if total == 0 || p.is_nan() || p <= 0.0 {
        return 0.0;
    }

    let last_finite = bounds.last().copied().unwrap_or(0.0);
    if p >= 1.0 {
        return last_finite;
    }

    let target = total as f64 * p;
    let mut cumulative = 0.0;
    for (i, &count) in buckets.iter().enumerate() {
        let before = cumulative;
        cumulative += count as f64;
        if cumulative < target {
            continue;
        }
        let Some(&upper) = bounds.get(i) else {
            return last_finite;
        };
        let lower = if i == 0 { 0.0 } else { bounds[i - 1] };
        if count == 0 {
            return lower;
        }
        return finite_or_zero(lower + (upper - lower) * (target - before) / count as f64);
    }

    last_finite
}

/// Per-bucket deltas between two cumulative snapshots of the same
/// histogram. A bucket that went backwards was reset inside the window and
/// contributes its latest value.
pub fn window_bucket_deltas(earliest: &[u64], latest: &[u64]) -> Vec<u64> {
    latest
        .iter()
        .enumerate()
        .map(|(i, &last)| match earliest.get(i) {
            Some(&first) if last >= first => last - first,
            Some(_) => last,
            None => last,
        })
        .collect()
}

/// p50/p90/p95/p99 in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Estimate all reported percentiles from bucket counts
    pub fn estimate(bounds: &[f64], counts: &[u64]) -> Self {
        let [p50, p90, p95, p99] = REPORTED_PERCENTILES.map(|p| histogram_percentile(bounds, counts, p));
        Self { p50, p90, p95, p99 }
    }
}

/// Non-cumulative bucket counts ready for percentile estimation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketCounts {
    /// Ascending finite upper bounds
    pub bounds: SmallVec<[f64; 16]>,
    /// One count per bound plus the `+Inf` bucket
    pub counts: SmallVec<[u64; 17]>,
}

impl BucketCounts {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn percentiles(&self) -> Percentiles {
        Percentiles::estimate(&self.bounds, &self.counts)
    }
}

/// One cycle's (or one window's) latency increments, merged across entities.
///
/// Buckets hold Prometheus-style `le` counts: each bound counts every
/// observation at or below it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyHistogram {
    buckets: BTreeMap<BucketBound, f64>,
    sum: f64,
    count: f64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `le` bucket increment
    pub fn add_bucket(&mut self, bound: BucketBound, delta: f64) {
        *self.buckets.entry(bound).or_insert(0.0) += delta;
    }

    pub fn add_sum(&mut self, delta: f64) {
        self.sum += delta;
    }

    pub fn add_count(&mut self, delta: f64) {
        self.count += delta;
    }

    /// Bucket-wise merge of another histogram
    pub fn merge(&mut self, other: &LatencyHistogram) {
        for (bound, delta) in &other.buckets {
            self.add_bucket(*bound, *delta);
        }
        self.sum += other.sum;
        self.count += other.count;
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.count == 0.0
    }

    /// Observation count: the larger of `_count` and the `+Inf` bucket, since
    /// merged entities may report only one of them
    pub fn count(&self) -> f64 {
        self.inf_cumulative().map_or(self.count, |inf| inf.max(self.count))
    }

    fn inf_cumulative(&self) -> Option<f64> {
        self.buckets
            .iter()
            .find(|(b, _)| !b.is_finite())
            .map(|(_, v)| *v)
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Mean observed value, zero without observations
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count <= 0.0 {
            return 0.0;
        }
        finite_or_zero(self.sum / count)
    }

    /// Convert cumulative `le` counts into per-bucket counts.
    ///
    /// Buckets whose cumulative count dropped below their predecessor (one
    /// bucket skipped on reset while its neighbours were not) count zero.
    pub fn bucket_counts(&self) -> BucketCounts {
        let mut out = BucketCounts::default();
        let mut previous = 0.0_f64;

        for (bound, cumulative) in self.buckets.iter().filter(|(b, _)| b.is_finite()) {
            out.bounds.push(bound.0);
            out.counts.push(to_count(cumulative - previous));
            previous = previous.max(*cumulative);
        }

        out.counts.push(to_count(self.count() - previous));
        out
    }

    pub fn percentiles(&self) -> Percentiles {
        self.bucket_counts().percentiles()
    }
}

fn to_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}
