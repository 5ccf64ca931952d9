//! Folds per-entity deltas into service, edge and ingress SLOs.
//!
//! Rates always divide by the caller-supplied window (the wall-clock time
//! between scrapes), never by timestamps found in samples.

use crate::core::{EdgeKey, ServiceKey};
use crate::metrics::delta::{CycleDeltas, DeltaRecord, MeshResponseMeta};
use crate::metrics::histogram::{LatencyHistogram, Percentiles};
use crate::metrics::rate::{per_second, percent};
use crate::metrics::types::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latency statistics of one aggregate, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub avg_ms: f64,
    #[serde(flatten)]
    pub percentiles: Percentiles,
}

impl LatencySummary {
    pub fn from_histogram(histogram: &LatencyHistogram) -> Self {
        Self {
            avg_ms: histogram.mean(),
            percentiles: histogram.percentiles(),
        }
    }
}

/// Request statistics of one ingress service key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressSlo {
    pub service_key: String,
    pub requests: f64,
    pub errors: f64,
    pub rps: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub latency: LatencySummary,
    pub status_codes: BTreeMap<String, f64>,
    pub methods: BTreeMap<String, f64>,
    pub window_seconds: f64,
}

/// Server-side statistics of one meshed workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSlo {
    pub service: ServiceKey,
    pub requests: f64,
    pub failures: f64,
    pub rps: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    /// Share of requests received over mTLS
    pub tls_percent: f64,
    pub latency: LatencySummary,
    pub status_codes: BTreeMap<String, f64>,
    pub window_seconds: f64,
}

/// Client-side statistics of one workload-to-workload edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEdge {
    pub edge: EdgeKey,
    pub requests: f64,
    pub errors: f64,
    pub rps: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub tls_percent: f64,
    pub latency: LatencySummary,
    pub status_codes: BTreeMap<String, f64>,
    pub window_seconds: f64,
}

/// Externally visible aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregatedMetric {
    Ingress(IngressSlo),
    Service(ServiceSlo),
    Edge(ServiceEdge),
}

impl AggregatedMetric {
    /// Entity name used for time-series retention
    pub fn entity_name(&self) -> String {
        match self {
            AggregatedMetric::Ingress(slo) => format!("ingress:{}", slo.service_key),
            AggregatedMetric::Service(slo) => slo.service.to_string(),
            AggregatedMetric::Edge(edge) => edge.edge.to_string(),
        }
    }
}

/// Ingress error: 4xx or 5xx
pub fn is_ingress_error(code: &str) -> bool {
    matches!(code.as_bytes().first(), Some(b'4' | b'5'))
}

/// Mesh edge error: anything but 2xx
pub fn is_edge_error(code: &str) -> bool {
    !code.starts_with('2')
}

#[derive(Default)]
struct Tally {
    requests: f64,
    errors: f64,
    tls: f64,
    status_codes: BTreeMap<String, f64>,
    methods: BTreeMap<String, f64>,
    latency: LatencyHistogram,
}

impl Tally {
    fn count(&mut self, code: &str, delta: f64, is_error: bool) {
        self.requests += delta;
        if is_error {
            self.errors += delta;
        }
        *self.status_codes.entry(code.to_string()).or_insert(0.0) += delta;
    }

    fn success_rate(&self) -> f64 {
        percent(self.requests - self.errors, self.requests)
    }

    fn error_rate(&self) -> f64 {
        percent(self.errors, self.requests)
    }
}

/// Fold one cycle's deltas into aggregates.
///
/// Output order is deterministic: ingress keys, then services, then edges,
/// each sorted by key.
pub fn aggregate(deltas: &CycleDeltas, window_secs: f64) -> Vec<AggregatedMetric> {
    let mut out = Vec::new();
    out.extend(aggregate_ingress(deltas, window_secs).into_iter().map(AggregatedMetric::Ingress));
    out.extend(aggregate_services(deltas, window_secs).into_iter().map(AggregatedMetric::Service));
    out.extend(aggregate_edges(deltas, window_secs).into_iter().map(AggregatedMetric::Edge));
    out
}

/// Ingress SLOs keyed by service key
pub fn aggregate_ingress(deltas: &CycleDeltas, window_secs: f64) -> Vec<IngressSlo> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

    for record in &deltas.ingress_requests {
        let tally = tallies.entry(record.meta.service_key.clone()).or_default();
        tally.count(&record.meta.code, record.delta, is_ingress_error(&record.meta.code));
        if !record.meta.method.is_empty() {
            *tally.methods.entry(record.meta.method.clone()).or_insert(0.0) += record.delta;
        }
    }

    for record in &deltas.ingress_latency {
        tallies
            .entry(record.meta.service_key.clone())
            .or_default()
            .latency
            .merge(&record.histogram);
    }

    tallies
        .into_iter()
        .map(|(service_key, tally)| IngressSlo {
            service_key,
            requests: tally.requests,
            errors: tally.errors,
            rps: per_second(tally.requests, window_secs),
            success_rate: tally.success_rate(),
            error_rate: tally.error_rate(),
            latency: LatencySummary::from_histogram(&tally.latency),
            status_codes: tally.status_codes,
            methods: tally.methods,
            window_seconds: window_secs,
        })
        .collect()
}

fn count_mesh(tally: &mut Tally, record: &DeltaRecord<MeshResponseMeta>, is_error: bool) {
    tally.count(&record.meta.status_code, record.delta, is_error);
    if record.meta.tls {
        tally.tls += record.delta;
    }
}

/// Server-side SLOs from inbound proxy traffic, keyed by workload
pub fn aggregate_services(deltas: &CycleDeltas, window_secs: f64) -> Vec<ServiceSlo> {
    let mut tallies: BTreeMap<ServiceKey, Tally> = BTreeMap::new();

    for record in deltas
        .mesh_responses
        .iter()
        .filter(|r| r.meta.direction == Direction::Inbound)
    {
        let failed = record.meta.classification != "success";
        count_mesh(tallies.entry(record.meta.workload.clone()).or_default(), record, failed);
    }

    for record in deltas
        .mesh_latency
        .iter()
        .filter(|r| r.meta.direction == Direction::Inbound)
    {
        tallies
            .entry(record.meta.workload.clone())
            .or_default()
            .latency
            .merge(&record.histogram);
    }

    tallies
        .into_iter()
        .map(|(service, tally)| ServiceSlo {
            service,
            requests: tally.requests,
            failures: tally.errors,
            rps: per_second(tally.requests, window_secs),
            success_rate: tally.success_rate(),
            error_rate: tally.error_rate(),
            tls_percent: percent(tally.tls, tally.requests),
            latency: LatencySummary::from_histogram(&tally.latency),
            status_codes: tally.status_codes,
            window_seconds: window_secs,
        })
        .collect()
}

/// Client-side edges from outbound proxy traffic
pub fn aggregate_edges(deltas: &CycleDeltas, window_secs: f64) -> Vec<ServiceEdge> {
    let mut tallies: BTreeMap<EdgeKey, Tally> = BTreeMap::new();

    for record in deltas
        .mesh_responses
        .iter()
        .filter(|r| r.meta.direction == Direction::Outbound && !r.meta.dst.is_unknown())
    {
        let edge = EdgeKey::new(record.meta.workload.clone(), record.meta.dst.clone());
        let is_error = is_edge_error(&record.meta.status_code);
        count_mesh(tallies.entry(edge).or_default(), record, is_error);
    }

    for record in deltas
        .mesh_latency
        .iter()
        .filter(|r| r.meta.direction == Direction::Outbound && !r.meta.dst.is_unknown())
    {
        let edge = EdgeKey::new(record.meta.workload.clone(), record.meta.dst.clone());
        tallies.entry(edge).or_default().latency.merge(&record.histogram);
    }

    tallies
        .into_iter()
        .map(|(edge, tally)| ServiceEdge {
            edge,
            requests: tally.requests,
            errors: tally.errors,
            rps: per_second(tally.requests, window_secs),
            success_rate: tally.success_rate(),
            error_rate: tally.error_rate(),
            tls_percent: percent(tally.tls, tally.requests),
            latency: LatencySummary::from_histogram(&tally.latency),
            status_codes: tally.status_codes,
            window_seconds: window_secs,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::delta::{HistogramDeltaRecord, IngressMeta, MeshLatencyMeta};
    use crate::metrics::types::{BucketBound, EntityKey};
    use pretty_assertions::assert_eq;

    fn ingress(service: &str, code: &str, method: &str, delta: f64) -> DeltaRecord<IngressMeta> {
        DeltaRecord {
            key: EntityKey::from_parts(&[service, code, method]),
            meta: IngressMeta {
                service_key: service.to_string(),
                code: code.to_string(),
                method: method.to_string(),
            },
            delta,
        }
    }

    fn mesh(direction: Direction, dst: &str, code: &str, class: &str, delta: f64) -> DeltaRecord<MeshResponseMeta> {
        DeltaRecord {
            key: EntityKey::from_parts(&[dst, code, class]),
            meta: MeshResponseMeta {
                direction,
                workload: ServiceKey::new("shop", "web"),
                dst: ServiceKey::new("shop", dst),
                status_code: code.to_string(),
                classification: class.to_string(),
                tls: code == "200",
            },
            delta,
        }
    }

    #[test]
    fn test_empty_deltas_aggregate_to_nothing() {
        assert!(aggregate(&CycleDeltas::default(), 15.0).is_empty());
    }

    #[test]
    fn test_ingress_rates_and_breakdowns() {
        let deltas = CycleDeltas {
            ingress_requests: vec![
                ingress("api@file", "200", "GET", 90.0),
                ingress("api@file", "503", "GET", 6.0),
                ingress("api@file", "404", "POST", 4.0),
            ],
            ..CycleDeltas::default()
        };

        let slos = aggregate_ingress(&deltas, 10.0);
        assert_eq!(slos.len(), 1);
        let slo = &slos[0];
        assert_eq!(slo.requests, 100.0);
        assert_eq!(slo.errors, 10.0);
        assert_eq!(slo.rps, 10.0);
        assert_eq!(slo.success_rate, 90.0);
        assert_eq!(slo.error_rate, 10.0);
        assert_eq!(slo.methods.get("GET"), Some(&96.0));
        assert_eq!(slo.status_codes.get("404"), Some(&4.0));
    }

    #[test]
    fn test_zero_traffic_has_zero_rates() {
        let deltas = CycleDeltas {
            ingress_requests: vec![ingress("api@file", "200", "GET", 0.0)],
            ..CycleDeltas::default()
        };
        let slo = &aggregate_ingress(&deltas, 15.0)[0];
        assert_eq!(slo.success_rate, 0.0);
        assert_eq!(slo.error_rate, 0.0);
        assert!(slo.latency.avg_ms.is_finite());
    }

    #[test]
    fn test_service_uses_classification_edge_uses_status() {
        let deltas = CycleDeltas {
            mesh_responses: vec![
                mesh(Direction::Inbound, "web", "200", "success", 80.0),
                mesh(Direction::Inbound, "web", "500", "failure", 20.0),
                // 404 classified as success by the proxy
                mesh(Direction::Outbound, "db", "404", "success", 5.0),
                mesh(Direction::Outbound, "db", "200", "success", 15.0),
            ],
            ..CycleDeltas::default()
        };

        let services = aggregate_services(&deltas, 10.0);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].failures, 20.0);
        assert_eq!(services[0].success_rate, 80.0);
        assert_eq!(services[0].tls_percent, 80.0);

        let edges = aggregate_edges(&deltas, 10.0);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge.to_string(), "shop/web -> shop/db");
        assert_eq!(edges[0].errors, 5.0);
        assert_eq!(edges[0].error_rate, 25.0);
        assert_eq!(edges[0].rps, 2.0);
    }

    #[test]
    fn test_latency_is_merged_bucketwise_before_percentiles() {
        let mut fast = LatencyHistogram::new();
        fast.add_bucket(BucketBound(10.0), 90.0);
        fast.add_bucket(BucketBound(100.0), 90.0);
        fast.add_count(90.0);
        let mut slow = LatencyHistogram::new();
        slow.add_bucket(BucketBound(10.0), 0.0);
        slow.add_bucket(BucketBound(100.0), 10.0);
        slow.add_count(10.0);

        let meta = MeshLatencyMeta {
            direction: Direction::Inbound,
            workload: ServiceKey::new("shop", "web"),
            dst: ServiceKey::new("shop", "web"),
            status_code: "200".to_string(),
        };
        let deltas = CycleDeltas {
            mesh_latency: vec![
                HistogramDeltaRecord {
                    key: EntityKey::from_parts(&["web-1"]),
                    meta: meta.clone(),
                    histogram: fast,
                },
                HistogramDeltaRecord {
                    key: EntityKey::from_parts(&["web-2"]),
                    meta,
                    histogram: slow,
                },
            ],
            ..CycleDeltas::default()
        };

        let services = aggregate_services(&deltas, 10.0);
        let latency = services[0].latency;
        // 100 observations: 90 in (0,10], 10 in (10,100]
        assert!((latency.percentiles.p50 - 50.0 / 9.0).abs() < 1e-9);
        assert!(latency.percentiles.p99 > 10.0);
    }

    #[test]
    fn test_error_classification() {
        assert!(is_ingress_error("404"));
        assert!(is_ingress_error("502"));
        assert!(!is_ingress_error("302"));
        assert!(!is_ingress_error(""));
        assert!(is_edge_error("302"));
        assert!(!is_edge_error("204"));
    }
}
