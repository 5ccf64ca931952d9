//! Windowed historical SLO queries over cumulative snapshots.
//!
//! Unlike the live delta engine this works on two cumulative observations
//! taken at the edges of a window. Any counter or bucket that went backwards
//! in between was reset inside the window and contributes its latest value.

use crate::core::config::EngineConfig;
use crate::metrics::aggregator::LatencySummary;
use crate::metrics::histogram::{window_bucket_deltas, LatencyHistogram, Percentiles};
use crate::metrics::rate::{finite_or_zero, per_second, percent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Window used when a query does not name one
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// `since`/`bucket` pair supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowQuery {
    /// How far back the window reaches; zero selects the default window
    #[serde(with = "humantime_serde")]
    pub since: Duration,
    /// Width of each sub-window in a bucketed series; zero disables bucketing
    #[serde(with = "humantime_serde")]
    pub bucket: Duration,
}

impl Default for WindowQuery {
    fn default() -> Self {
        Self {
            since: DEFAULT_WINDOW,
            bucket: Duration::from_secs(60),
        }
    }
}

impl WindowQuery {
    pub fn new(since: Duration, bucket: Duration) -> Self {
        Self { since, bucket }
    }

    /// Configured default window, bucketed per minute
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            since: config.default_window,
            ..Self::default()
        }
    }

    /// Window length in seconds, falling back to [`DEFAULT_WINDOW`]
    pub fn window_secs(&self) -> f64 {
        if self.since.is_zero() {
            DEFAULT_WINDOW.as_secs_f64()
        } else {
            self.since.as_secs_f64()
        }
    }
}

/// One cumulative observation of a service's counters and latency buckets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CumulativeSnapshot {
    pub taken_at: Option<DateTime<Utc>>,
    pub requests: f64,
    pub errors: f64,
    pub latency_sum: f64,
    pub latency_count: f64,
    /// Ascending finite bucket bounds
    pub bounds: Vec<f64>,
    /// Per-bucket cumulative counts, one per bound plus `+Inf`
    pub buckets: Vec<u64>,
}

impl CumulativeSnapshot {
    /// Capture counters together with a cumulative latency histogram
    pub fn capture(requests: f64, errors: f64, histogram: &LatencyHistogram) -> Self {
        let counts = histogram.bucket_counts();
        Self {
            taken_at: None,
            requests,
            errors,
            latency_sum: histogram.sum(),
            latency_count: histogram.count(),
            bounds: counts.bounds.to_vec(),
            buckets: counts.counts.to_vec(),
        }
    }

    pub fn at(mut self, taken_at: DateTime<Utc>) -> Self {
        self.taken_at = Some(taken_at);
        self
    }
}

/// SLO statistics over one window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub window_seconds: f64,
    pub requests: f64,
    pub errors: f64,
    pub rps: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub latency: LatencySummary,
}

fn window_delta(earliest: f64, latest: f64) -> f64 {
    if latest < earliest {
        finite_or_zero(latest.max(0.0))
    } else {
        finite_or_zero(latest - earliest)
    }
}

/// Seconds between the two snapshots, or the query window when either lacks
/// a timestamp or they are not in order
fn span_secs(earliest: &CumulativeSnapshot, latest: &CumulativeSnapshot, query: &WindowQuery) -> f64 {
    match (earliest.taken_at, latest.taken_at) {
        (Some(start), Some(end)) if end > start => (end - start).num_milliseconds() as f64 / 1000.0,
        _ => query.window_secs(),
    }
}

/// Summarize the traffic between two cumulative snapshots.
///
/// Rates are taken over the time between the snapshots when both are
/// timestamped. Bucket layouts that changed between the snapshots mean the
/// histogram was recreated; the latest buckets are then taken whole.
pub fn summarize_window(
    earliest: &CumulativeSnapshot,
    latest: &CumulativeSnapshot,
    query: &WindowQuery,
) -> WindowSummary {
    let window_secs = span_secs(earliest, latest, query);
    let requests = window_delta(earliest.requests, latest.requests);
    let errors = window_delta(earliest.errors, latest.errors).min(requests);

    let bucket_deltas = if earliest.bounds == latest.bounds {
        window_bucket_deltas(&earliest.buckets, &latest.buckets)
    } else {
        latest.buckets.clone()
    };

    let latency_count = window_delta(earliest.latency_count, latest.latency_count);
    let latency_sum = window_delta(earliest.latency_sum, latest.latency_sum);
    let avg_ms = if latency_count > 0.0 {
        finite_or_zero(latency_sum / latency_count)
    } else {
        0.0
    };

    WindowSummary {
        start: earliest.taken_at,
        end: latest.taken_at,
        window_seconds: window_secs,
        requests,
        errors,
        rps: per_second(requests, window_secs),
        success_rate: percent(requests - errors, requests),
        error_rate: percent(errors, requests),
        latency: LatencySummary {
            avg_ms,
            percentiles: Percentiles::estimate(&latest.bounds, &bucket_deltas),
        },
    }
}

/// Split time-ordered snapshots into `query.bucket`-wide sub-windows and
/// summarize each.
///
/// Each sub-window is diffed against the last snapshot of the previous
/// populated sub-window, so adjacent summaries share an edge and together
/// cover everything between the first and last snapshot. Snapshots without a
/// timestamp or older than `now - since` are ignored. The first sub-window
/// needs two snapshots of its own to produce a summary.
pub fn summarize_buckets(
    snapshots: &[CumulativeSnapshot],
    query: &WindowQuery,
    now: DateTime<Utc>,
) -> Vec<WindowSummary> {
    let since = chrono::Duration::milliseconds((query.window_secs() * 1000.0) as i64);
    let start = now - since;

    let mut timed: Vec<(&CumulativeSnapshot, DateTime<Utc>)> = snapshots
        .iter()
        .filter_map(|s| s.taken_at.map(|t| (s, t)))
        .filter(|(_, t)| *t >= start && *t <= now)
        .collect();
    timed.sort_by_key(|(_, t)| *t);

    if query.bucket.is_zero() {
        return match (timed.first(), timed.last()) {
            (Some((first, _)), Some((last, _))) if timed.len() > 1 => {
                vec![summarize_window(first, last, query)]
            }
            _ => Vec::new(),
        };
    }

    let bucket_ms = query.bucket.as_millis().max(1) as i64;
    let sub_query = WindowQuery::new(query.bucket, Duration::ZERO);

    // (first, last, len) of every populated sub-window, in time order
    let mut groups: Vec<(&CumulativeSnapshot, &CumulativeSnapshot, usize)> = Vec::new();
    let mut current_bucket = None;
    for (snapshot, taken_at) in timed {
        let index = (taken_at - start).num_milliseconds() / bucket_ms;
        match groups.last_mut() {
            Some(group) if current_bucket == Some(index) => {
                group.1 = snapshot;
                group.2 += 1;
            }
            _ => {
                groups.push((snapshot, snapshot, 1));
                current_bucket = Some(index);
            }
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    let mut baseline: Option<&CumulativeSnapshot> = None;
    for (first, last, len) in groups {
        match baseline {
            Some(previous) => out.push(summarize_window(previous, last, &sub_query)),
            None if len > 1 => out.push(summarize_window(first, last, &sub_query)),
            None => {}
        }
        baseline = Some(last);
    }
    out
}
