//! Counter math shared by the delta engine, the snapshot tracker and the
//! node converter.
//!
//! Every function here is total: no panics, no errors, never a non-finite
//! result for finite input.

use serde::{Deserialize, Serialize};

/// What to do when a cumulative counter goes backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Presume a restart and emit nothing for this cycle
    Skip,
    /// Presume the counter restarted from zero and use the current value
    CurrentAsDelta,
}

/// Per-second rate between two observations of a cumulative counter.
///
/// Zero when no time elapsed or the counter went backwards.
#[inline]
pub fn rate(cur: f64, prev: f64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 || cur < prev {
        return 0.0;
    }
    finite_or_zero((cur - prev) / elapsed_secs)
}

/// Increment between two observations, zero on reset.
#[inline]
pub fn delta(cur: f64, prev: f64) -> f64 {
    if cur < prev {
        return 0.0;
    }
    finite_or_zero(cur - prev)
}

/// Increment under an explicit reset policy.
///
/// `None` means "emit nothing for this key this cycle".
#[inline]
pub fn counter_delta(cur: f64, prev: f64, policy: ResetPolicy) -> Option<f64> {
    if cur >= prev {
        return Some(finite_or_zero(cur - prev));
    }
    match policy {
        ResetPolicy::Skip => None,
        ResetPolicy::CurrentAsDelta => Some(finite_or_zero(cur.max(0.0))),
    }
}

/// `part / total * 100`, zero when `total` is zero
#[inline]
pub fn percent(part: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    finite_or_zero(part / total * 100.0)
}

/// `value / secs`, zero for an empty window
#[inline]
pub fn per_second(value: f64, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    finite_or_zero(value / secs)
}

#[inline]
pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
