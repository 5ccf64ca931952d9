//! Rolling one-hour time series of node and SLO metrics.
//!
//! Every entity owns a [`Ring`] of one-minute slots indexed by
//! `minute mod capacity`. Writes within the same minute replace each other
//! and a slot is reused once its minute falls out of the window, so memory
//! stays bounded per entity without any eviction pass.

use crate::metrics::aggregator::AggregatedMetric;
use crate::metrics::node::NodeMetrics;
use ahash::AHashMap;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Default number of one-minute slots per entity
pub const DEFAULT_RING_CAPACITY: usize = 60;

/// Fixed-capacity ring of minute-aligned points
#[derive(Debug, Clone)]
pub struct Ring<T> {
    slots: Vec<Option<(i64, T)>>,
}

impl<T: Clone> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, minute: i64) -> usize {
        minute.rem_euclid(self.slots.len() as i64) as usize
    }

    /// Store `point` for `minute`, replacing an older minute or an earlier
    /// write of the same one. A write older than what the slot holds is dropped.
    pub fn put(&mut self, minute: i64, point: T) {
        let index = self.slot(minute);
        if let Some((stored, _)) = &self.slots[index] {
            if *stored > minute {
                return;
            }
        }
        self.slots[index] = Some((minute, point));
    }

    /// Populated minutes in `[now - capacity + 1, now]`, oldest first
    pub fn flush(&self, now_minute: i64) -> Vec<(i64, T)> {
        let capacity = self.slots.len() as i64;
        (now_minute - capacity + 1..=now_minute)
            .filter_map(|minute| match &self.slots[self.slot(minute)] {
                Some((stored, point)) if *stored == minute => Some((minute, point.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Downsampled node utilisation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePoint {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    pub network_rx_bytes_per_sec: f64,
    pub network_tx_bytes_per_sec: f64,
}

impl From<&NodeMetrics> for NodePoint {
    fn from(m: &NodeMetrics) -> Self {
        Self {
            cpu_percent: m.cpu_percent,
            memory_percent: m.memory_percent,
            disk_read_bytes_per_sec: m.disk_read_bytes_per_sec,
            disk_write_bytes_per_sec: m.disk_write_bytes_per_sec,
            network_rx_bytes_per_sec: m.network_rx_bytes_per_sec,
            network_tx_bytes_per_sec: m.network_tx_bytes_per_sec,
        }
    }
}

/// Downsampled SLO statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SloPoint {
    pub rps: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl From<&AggregatedMetric> for SloPoint {
    fn from(metric: &AggregatedMetric) -> Self {
        let (rps, success_rate, error_rate, latency) = match metric {
            AggregatedMetric::Ingress(s) => (s.rps, s.success_rate, s.error_rate, s.latency),
            AggregatedMetric::Service(s) => (s.rps, s.success_rate, s.error_rate, s.latency),
            AggregatedMetric::Edge(e) => (e.rps, e.success_rate, e.error_rate, e.latency),
        };
        Self {
            rps,
            success_rate,
            error_rate,
            p50_ms: latency.percentiles.p50,
            p95_ms: latency.percentiles.p95,
            p99_ms: latency.percentiles.p99,
        }
    }
}

/// One point of a flushed series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint<T> {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub value: T,
}

/// Flushed series of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesEntity<T> {
    pub name: String,
    pub points: Vec<TimeSeriesPoint<T>>,
}

#[derive(Debug, Default)]
struct Rings {
    nodes: AHashMap<String, Ring<NodePoint>>,
    slos: AHashMap<String, Ring<SloPoint>>,
}

/// Process-wide time-series cache fed once per scrape
#[derive(Debug)]
pub struct Concentrator {
    capacity: usize,
    rings: RwLock<Rings>,
}

impl Default for Concentrator {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

fn minute_of(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp().div_euclid(60)
}

fn minute_start(minute: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(minute * 60, 0).single().unwrap_or_default()
}

fn flush_map<T: Clone>(map: &AHashMap<String, Ring<T>>, now_minute: i64) -> Vec<TimeSeriesEntity<T>> {
    let mut series: Vec<TimeSeriesEntity<T>> = map
        .iter()
        .filter_map(|(name, ring)| {
            let points: Vec<_> = ring
                .flush(now_minute)
                .into_iter()
                .map(|(minute, value)| TimeSeriesPoint {
                    timestamp: minute_start(minute),
                    value,
                })
                .collect();
            (!points.is_empty()).then(|| TimeSeriesEntity {
                name: name.clone(),
                points,
            })
        })
        .collect();
    series.sort_by(|a, b| a.name.cmp(&b.name));
    series
}

impl Concentrator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rings: RwLock::new(Rings::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record one scrape's node and SLO metrics under the minute of `timestamp`
    pub fn ingest(&self, nodes: &[NodeMetrics], slos: &[AggregatedMetric], timestamp: DateTime<Utc>) {
        let minute = minute_of(timestamp);
        let capacity = self.capacity;
        let mut rings = self.rings.write();

        for node in nodes {
            rings
                .nodes
                .entry(node.node.clone())
                .or_insert_with(|| Ring::new(capacity))
                .put(minute, NodePoint::from(node));
        }
        for slo in slos {
            rings
                .slos
                .entry(slo.entity_name())
                .or_insert_with(|| Ring::new(capacity))
                .put(minute, SloPoint::from(slo));
        }

        tracing::trace!(
            minute,
            nodes = rings.nodes.len(),
            slos = rings.slos.len(),
            "Concentrator ingest"
        );
    }

    pub fn flush_node_series(&self) -> Vec<TimeSeriesEntity<NodePoint>> {
        self.flush_node_series_at(Utc::now())
    }

    pub fn flush_slo_series(&self) -> Vec<TimeSeriesEntity<SloPoint>> {
        self.flush_slo_series_at(Utc::now())
    }

    /// Node series for the hour ending at `now`, sorted by node name
    pub fn flush_node_series_at(&self, now: DateTime<Utc>) -> Vec<TimeSeriesEntity<NodePoint>> {
        flush_map(&self.rings.read().nodes, minute_of(now))
    }

    /// SLO series for the hour ending at `now`, sorted by entity name
    pub fn flush_slo_series_at(&self, now: DateTime<Utc>) -> Vec<TimeSeriesEntity<SloPoint>> {
        flush_map(&self.rings.read().slos, minute_of(now))
    }

    /// Entities with a ring, including stale ones
    pub fn entity_count(&self) -> usize {
        let rings = self.rings.read();
        rings.nodes.len() + rings.slos.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_minute_last_write_wins() {
        let mut ring = Ring::new(60);
        ring.put(100, 1.0);
        ring.put(100, 2.0);
        assert_eq!(ring.flush(100), vec![(100, 2.0)]);
    }

    #[test]
    fn test_ring_keeps_most_recent_capacity_minutes() {
        let mut ring = Ring::new(60);
        for minute in 0..70 {
            ring.put(minute, minute);
        }
        let flushed = ring.flush(69);
        assert_eq!(flushed.len(), 60);
        assert_eq!(flushed.first(), Some(&(10, 10)));
        assert_eq!(flushed.last(), Some(&(69, 69)));
        assert!(flushed.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_late_write_of_older_minute_is_dropped() {
        let mut ring = Ring::new(60);
        ring.put(70, "new");
        // minute 10 maps to the same slot
        ring.put(10, "stale");
        assert_eq!(ring.flush(70), vec![(70, "new")]);
    }

    #[test]
    fn test_gaps_are_omitted() {
        let mut ring = Ring::new(60);
        ring.put(10, "a");
        ring.put(12, "c");
        assert_eq!(ring.flush(12), vec![(10, "a"), (12, "c")]);
        // minute 10 is more than an hour old
        assert_eq!(ring.flush(71), vec![(12, "c")]);
    }

    #[test]
    fn test_negative_minutes() {
        let mut ring = Ring::new(4);
        ring.put(-1, 'x');
        assert_eq!(ring.flush(0), vec![(-1, 'x')]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let ring: Ring<u8> = Ring::new(0);
        assert_eq!(ring.capacity(), 1);
    }
}
