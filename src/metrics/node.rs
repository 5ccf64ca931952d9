//! node-exporter counters to per-node utilisation.

use crate::metrics::rate::{delta, percent, rate};
use crate::metrics::types::{NodeSample, NodeSeries, NormalizedSample};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LOOPBACK: &str = "lo";

/// Utilisation of one node over the last scrape interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub node: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: f64,
    pub memory_total_bytes: f64,
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    pub network_rx_bytes_per_sec: f64,
    pub network_tx_bytes_per_sec: f64,
}

/// Cumulative counters of one node, summed across cpus and devices
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct NodeCounters {
    cpu_total: f64,
    cpu_idle: f64,
    memory_total: Option<f64>,
    memory_available: Option<f64>,
    disk_read: f64,
    disk_written: f64,
    network_rx: f64,
    network_tx: f64,
}

impl NodeCounters {
    fn observe(&mut self, series: &NodeSeries, value: f64) {
        match series {
            NodeSeries::CpuSeconds { mode, .. } => {
                self.cpu_total += value;
                if mode == "idle" {
                    self.cpu_idle += value;
                }
            }
            NodeSeries::MemoryTotal => self.memory_total = Some(value),
            NodeSeries::MemoryAvailable => self.memory_available = Some(value),
            NodeSeries::DiskReadBytes { .. } => self.disk_read += value,
            NodeSeries::DiskWrittenBytes { .. } => self.disk_written += value,
            NodeSeries::NetworkReceiveBytes { device } if device != LOOPBACK => self.network_rx += value,
            NodeSeries::NetworkTransmitBytes { device } if device != LOOPBACK => self.network_tx += value,
            NodeSeries::NetworkReceiveBytes { .. } | NodeSeries::NetworkTransmitBytes { .. } => {}
        }
    }

    fn memory(&self) -> (f64, f64, f64) {
        match (self.memory_total, self.memory_available) {
            (Some(total), Some(available)) if total > 0.0 => {
                let used = (total - available).max(0.0);
                (percent(used, total), used, total)
            }
            (Some(total), _) => (0.0, 0.0, total.max(0.0)),
            _ => (0.0, 0.0, 0.0),
        }
    }
}

/// Stateful converter keeping the previous counters of every node
#[derive(Debug, Default)]
pub struct NodeMetricsConverter {
    previous: AHashMap<String, (NodeCounters, DateTime<Utc>)>,
}

impl NodeMetricsConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes with remembered counters
    pub fn tracked_nodes(&self) -> usize {
        self.previous.len()
    }

    /// Convert the node samples of one scrape, ignoring every other family.
    pub fn convert(&mut self, samples: &[NormalizedSample], collected_at: DateTime<Utc>) -> Vec<NodeMetrics> {
        self.convert_nodes(
            samples.iter().filter_map(|s| match s {
                NormalizedSample::Node(node) => Some(node),
                _ => None,
            }),
            collected_at,
        )
    }

    /// Convert one scrape of node samples.
    ///
    /// A node seen for the first time reports memory only; rates need two
    /// observations. Output is sorted by node name.
    pub fn convert_nodes<'a, I>(&mut self, samples: I, collected_at: DateTime<Utc>) -> Vec<NodeMetrics>
    where
        I: IntoIterator<Item = &'a NodeSample>,
    {
        let mut current: BTreeMap<String, NodeCounters> = BTreeMap::new();
        for sample in samples {
            if !sample.value.is_finite() {
                continue;
            }
            current
                .entry(sample.node.clone())
                .or_default()
                .observe(&sample.series, sample.value);
        }

        let mut next = AHashMap::with_capacity(current.len());
        let mut out = Vec::with_capacity(current.len());

        for (node, counters) in current {
            let (memory_percent, memory_used_bytes, memory_total_bytes) = counters.memory();
            let mut metrics = NodeMetrics {
                node: node.clone(),
                timestamp: collected_at,
                cpu_percent: 0.0,
                memory_percent,
                memory_used_bytes,
                memory_total_bytes,
                disk_read_bytes_per_sec: 0.0,
                disk_write_bytes_per_sec: 0.0,
                network_rx_bytes_per_sec: 0.0,
                network_tx_bytes_per_sec: 0.0,
            };

            if let Some((prev, prev_at)) = self.previous.get(&node) {
                let elapsed = (collected_at - *prev_at).num_milliseconds() as f64 / 1000.0;
                let total = delta(counters.cpu_total, prev.cpu_total);
                let idle = delta(counters.cpu_idle, prev.cpu_idle).min(total);
                metrics.cpu_percent = percent(total - idle, total);
                metrics.disk_read_bytes_per_sec = rate(counters.disk_read, prev.disk_read, elapsed);
                metrics.disk_write_bytes_per_sec = rate(counters.disk_written, prev.disk_written, elapsed);
                metrics.network_rx_bytes_per_sec = rate(counters.network_rx, prev.network_rx, elapsed);
                metrics.network_tx_bytes_per_sec = rate(counters.network_tx, prev.network_tx, elapsed);
            }

            next.insert(node, (counters, collected_at));
            out.push(metrics);
        }

        self.previous = next;
        out
    }
}
