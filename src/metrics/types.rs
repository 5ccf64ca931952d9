//! Sample and record types flowing through the telemetry engine.
//!
//! Free-form label maps only exist on [`RawSample`]. The normalizer turns
//! them into one of the typed [`NormalizedSample`] variants and everything
//! downstream works with those.

use crate::core::ServiceKey;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Label set of a raw exposition line
pub type Labels = AHashMap<String, String>;

/// Kind of an observed metric line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Monotonically increasing counter (or untyped value)
    Counter,
    /// Point-in-time value
    Gauge,
    /// One cumulative `le` bucket of a histogram
    HistogramBucket,
    /// Cumulative sum of a histogram
    HistogramSum,
    /// Cumulative observation count of a histogram
    HistogramCount,
}

/// One observed metric line after parsing
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    /// Full metric name including any `_bucket`/`_sum`/`_count` suffix
    pub name: String,
    /// Kind of the line
    pub kind: MetricKind,
    /// Label set
    pub labels: Labels,
    /// Observed value
    pub value: f64,
}

impl RawSample {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            labels: Labels::new(),
            value,
        }
    }

    /// Builder-style label setter
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Label value, empty labels are treated as absent
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// First present label among `keys`
    pub fn first_label(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.label(k))
    }
}

/// Composite key of the finest grain at which a counter increments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(String);

impl EntityKey {
    /// Joins the parts with `|`
    pub fn from_parts(parts: &[&str]) -> Self {
        Self(parts.join("|"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upper bound of a histogram bucket, `+Inf` allowed.
///
/// Totally ordered so it can key maps; NaN bounds are rejected by the
/// normalizer before they get here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketBound(pub f64);

impl BucketBound {
    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }
}

impl PartialEq for BucketBound {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for BucketBound {}

impl PartialOrd for BucketBound {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BucketBound {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for BucketBound {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Which cumulative series of a histogram a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HistogramPart {
    /// Cumulative count of observations `<= le`
    Bucket(BucketBound),
    /// Cumulative sum of observations
    Sum,
    /// Cumulative number of observations
    Count,
}

/// Proxy direction of a mesh sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Ingress controller the sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressVendor {
    Traefik,
    Nginx,
    Kong,
}

/// Request counter of an ingress controller
#[derive(Debug, Clone, PartialEq)]
pub struct IngressRequest {
    pub vendor: IngressVendor,
    /// Canonical service key (`service` for Traefik/Kong, `namespace/service` or host for Nginx)
    pub service_key: String,
    pub namespace: Option<String>,
    /// Request path when the controller exports one (ingress-nginx)
    pub path: Option<String>,
    pub code: String,
    pub method: String,
    pub value: f64,
}

impl IngressRequest {
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::from_parts(&[&self.service_key, &self.code, &self.method])
    }
}

/// Latency histogram series of an ingress controller, in milliseconds
#[derive(Debug, Clone, PartialEq)]
pub struct IngressLatency {
    pub vendor: IngressVendor,
    pub service_key: String,
    pub namespace: Option<String>,
    pub path: Option<String>,
    pub code: String,
    pub method: String,
    pub part: HistogramPart,
    pub value: f64,
}

impl IngressLatency {
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::from_parts(&[&self.service_key, &self.code, &self.method])
    }
}

/// Linkerd `response_total` sample
#[derive(Debug, Clone, PartialEq)]
pub struct MeshResponse {
    pub direction: Direction,
    pub pod: String,
    /// Workload owning the proxy
    pub workload: ServiceKey,
    /// Destination workload (outbound) or the workload itself (inbound)
    pub dst: ServiceKey,
    pub status_code: String,
    /// `success` / `failure` as reported by the proxy
    pub classification: String,
    pub tls: bool,
    pub target_port: Option<u16>,
    pub authority: Option<String>,
    pub route: Option<String>,
    pub value: f64,
}

impl MeshResponse {
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::from_parts(&[
            &self.workload.namespace,
            &self.workload.name,
            &self.pod,
            self.direction.as_str(),
            &self.dst.namespace,
            &self.dst.name,
            &self.status_code,
            &self.classification,
            if self.tls { "tls" } else { "plain" },
        ])
    }

    pub fn is_success(&self) -> bool {
        self.classification == "success"
    }
}

/// Linkerd `response_latency_ms` histogram series
#[derive(Debug, Clone, PartialEq)]
pub struct MeshLatency {
    pub direction: Direction,
    pub pod: String,
    pub workload: ServiceKey,
    pub dst: ServiceKey,
    pub status_code: String,
    pub target_port: Option<u16>,
    pub authority: Option<String>,
    pub route: Option<String>,
    pub part: HistogramPart,
    pub value: f64,
}

impl MeshLatency {
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::from_parts(&[
            &self.workload.namespace,
            &self.workload.name,
            &self.pod,
            self.direction.as_str(),
            &self.dst.namespace,
            &self.dst.name,
            &self.status_code,
        ])
    }
}

/// node-exporter series used by the node converter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeSeries {
    /// `node_cpu_seconds_total{cpu, mode}`
    CpuSeconds { cpu: String, mode: String },
    /// `node_memory_MemTotal_bytes`
    MemoryTotal,
    /// `node_memory_MemAvailable_bytes`
    MemoryAvailable,
    /// `node_disk_read_bytes_total{device}`
    DiskReadBytes { device: String },
    /// `node_disk_written_bytes_total{device}`
    DiskWrittenBytes { device: String },
    /// `node_network_receive_bytes_total{device}`
    NetworkReceiveBytes { device: String },
    /// `node_network_transmit_bytes_total{device}`
    NetworkTransmitBytes { device: String },
}

/// One node-exporter sample
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSample {
    pub node: String,
    pub series: NodeSeries,
    pub value: f64,
}

/// A sample translated out of its vendor label schema
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedSample {
    IngressRequest(IngressRequest),
    IngressLatency(IngressLatency),
    MeshResponse(MeshResponse),
    MeshLatency(MeshLatency),
    Node(NodeSample),
}

impl NormalizedSample {
    /// Short family name used in logs
    pub fn family(&self) -> &'static str {
        match self {
            NormalizedSample::IngressRequest(_) => "ingress_request",
            NormalizedSample::IngressLatency(_) => "ingress_latency",
            NormalizedSample::MeshResponse(_) => "mesh_response",
            NormalizedSample::MeshLatency(_) => "mesh_latency",
            NormalizedSample::Node(_) => "node",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_label_is_absent() {
        let sample = RawSample::new("response_total", MetricKind::Counter, 1.0)
            .with_label("dst_deployment", "")
            .with_label("dst_service", "web");

        assert_eq!(sample.label("dst_deployment"), None);
        assert_eq!(sample.first_label(&["dst_deployment", "dst_service"]), Some("web"));
    }

    #[test]
    fn test_bucket_bound_orders_infinity_last() {
        let mut bounds = vec![
            BucketBound(f64::INFINITY),
            BucketBound(10.0),
            BucketBound(0.5),
        ];
        bounds.sort();
        assert_eq!(bounds[0], BucketBound(0.5));
        assert!(!bounds[2].is_finite());
    }

    #[test]
    fn test_entity_key_joins_parts() {
        let key = EntityKey::from_parts(&["svc@file", "200", "GET"]);
        assert_eq!(key.as_str(), "svc@file|200|GET");
    }

    #[test]
    fn test_podless_outbound_rows_keep_workloads_apart() {
        let outbound = |workload: &str| MeshResponse {
            direction: Direction::Outbound,
            pod: String::new(),
            workload: ServiceKey::new("shop", workload),
            dst: ServiceKey::new("shop", "db"),
            status_code: "200".to_string(),
            classification: "success".to_string(),
            tls: true,
            target_port: None,
            authority: None,
            route: None,
            value: 1.0,
        };

        assert_ne!(outbound("web").entity_key(), outbound("cart").entity_key());
        assert_eq!(outbound("web").entity_key(), outbound("web").entity_key());
    }
}
