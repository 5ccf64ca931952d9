//! Vendor label schema normalization.
//!
//! Maps Traefik, ingress-nginx and Kong request metrics onto one ingress
//! shape, Linkerd proxy metrics onto one mesh shape and node-exporter
//! series onto [`NodeSample`]. Latency is always reported in milliseconds.
//! Unrecognized metric names are dropped silently: scrape endpoints expose
//! hundreds of runtime metrics nobody asked for.

use crate::core::ServiceKey;
use crate::metrics::types::{
    BucketBound, Direction, HistogramPart, IngressLatency, IngressRequest, IngressVendor,
    MeshLatency, MeshResponse, MetricKind, NodeSample, NodeSeries, NormalizedSample, RawSample,
};

const SECONDS_TO_MS: f64 = 1000.0;

const WORKLOAD_LABELS: &[&str] = &["deployment", "statefulset", "daemonset", "job"];
const DST_WORKLOAD_LABELS: &[&str] = &[
    "dst_deployment",
    "dst_statefulset",
    "dst_daemonset",
    "dst_job",
    "dst_service",
];
const NODE_LABELS: &[&str] = &["node", "kubernetes_node", "nodename"];

/// Stateless translator from raw exposition samples to typed families
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    /// Node name used for node-exporter samples that carry no node label
    default_node: Option<String>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node name to attribute unlabelled node-exporter samples to
    pub fn with_default_node(mut self, node: impl Into<String>) -> Self {
        self.default_node = Some(node.into());
        self
    }

    /// Normalize a whole scrape, dropping everything unrecognized
    pub fn normalize_all(&self, samples: &[RawSample]) -> Vec<NormalizedSample> {
        samples.iter().filter_map(|s| self.normalize(s)).collect()
    }

    /// Normalize one sample
    pub fn normalize(&self, sample: &RawSample) -> Option<NormalizedSample> {
        // counters never legitimately hold NaN or infinities
        if !sample.value.is_finite() {
            return None;
        }

        match sample.name.as_str() {
            // Traefik
            "traefik_service_requests_total" => {
                ingress_request(sample, IngressVendor::Traefik, sample.label("service")?.to_string())
            },
            name if name.starts_with("traefik_service_request_duration_seconds_") => {
                let key = sample.label("service")?.to_string();
                ingress_latency(sample, IngressVendor::Traefik, key, SECONDS_TO_MS)
            },

            // ingress-nginx
            "nginx_ingress_controller_requests" => {
                ingress_request(sample, IngressVendor::Nginx, nginx_service_key(sample)?)
            },
            name if name.starts_with("nginx_ingress_controller_request_duration_seconds_") => {
                ingress_latency(sample, IngressVendor::Nginx, nginx_service_key(sample)?, SECONDS_TO_MS)
            },

            // Kong
            "kong_http_requests_total" | "kong_http_status" => {
                ingress_request(sample, IngressVendor::Kong, sample.label("service")?.to_string())
            },
            name if name.starts_with("kong_request_latency_ms_") => {
                ingress_latency(sample, IngressVendor::Kong, sample.label("service")?.to_string(), 1.0)
            },
            name if name.starts_with("kong_latency_") && sample.label("type") == Some("request") => {
                ingress_latency(sample, IngressVendor::Kong, sample.label("service")?.to_string(), 1.0)
            },

            // Linkerd proxy
            "response_total" => mesh_response(sample),
            name if name.starts_with("response_latency_ms_") => mesh_latency(sample),

            // node-exporter
            name if name.starts_with("node_") => self.node_sample(sample),

            _ => None,
        }
    }

    fn node_sample(&self, sample: &RawSample) -> Option<NormalizedSample> {
        let series = match sample.name.as_str() {
            "node_cpu_seconds_total" => NodeSeries::CpuSeconds {
                cpu: sample.label("cpu")?.to_string(),
                mode: sample.label("mode")?.to_string(),
            },
            "node_memory_MemTotal_bytes" => NodeSeries::MemoryTotal,
            "node_memory_MemAvailable_bytes" => NodeSeries::MemoryAvailable,
            "node_disk_read_bytes_total" => NodeSeries::DiskReadBytes {
                device: sample.label("device")?.to_string(),
            },
            "node_disk_written_bytes_total" => NodeSeries::DiskWrittenBytes {
                device: sample.label("device")?.to_string(),
            },
            "node_network_receive_bytes_total" => NodeSeries::NetworkReceiveBytes {
                device: sample.label("device")?.to_string(),
            },
            "node_network_transmit_bytes_total" => NodeSeries::NetworkTransmitBytes {
                device: sample.label("device")?.to_string(),
            },
            _ => return None,
        };

        let node = match sample.first_label(NODE_LABELS) {
            Some(node) => node.to_string(),
            None => match sample.label("instance") {
                Some(instance) => strip_port(instance).to_string(),
                None => self.default_node.clone()?,
            },
        };

        Some(NormalizedSample::Node(NodeSample {
            node,
            series,
            value: sample.value,
        }))
    }
}

fn ingress_request(
    sample: &RawSample,
    vendor: IngressVendor,
    service_key: String,
) -> Option<NormalizedSample> {
    if sample.kind == MetricKind::Gauge {
        return None;
    }
    Some(NormalizedSample::IngressRequest(IngressRequest {
        vendor,
        service_key,
        namespace: sample.label("namespace").map(str::to_string),
        path: sample.label("path").map(str::to_string),
        code: status_label(sample),
        method: sample.label("method").unwrap_or_default().to_uppercase(),
        value: sample.value,
    }))
}

fn ingress_latency(
    sample: &RawSample,
    vendor: IngressVendor,
    service_key: String,
    scale: f64,
) -> Option<NormalizedSample> {
    let (part, value) = histogram_part(sample, scale)?;
    Some(NormalizedSample::IngressLatency(IngressLatency {
        vendor,
        service_key,
        namespace: sample.label("namespace").map(str::to_string),
        path: sample.label("path").map(str::to_string),
        code: status_label(sample),
        method: sample.label("method").unwrap_or_default().to_uppercase(),
        part,
        value,
    }))
}

/// `namespace/service` when the backend service is known, else the host
fn nginx_service_key(sample: &RawSample) -> Option<String> {
    match (sample.label("namespace"), sample.label("service")) {
        (Some(ns), Some(service)) => Some(format!("{}/{}", ns, service)),
        (None, Some(service)) => Some(service.to_string()),
        _ => sample.label("host").map(str::to_string),
    }
}

fn status_label(sample: &RawSample) -> String {
    sample
        .first_label(&["code", "status", "status_code"])
        .unwrap_or_default()
        .to_string()
}

/// Splits a histogram line into its part, scaling bounds and sums.
fn histogram_part(sample: &RawSample, scale: f64) -> Option<(HistogramPart, f64)> {
    let name = sample.name.as_str();
    if name.ends_with("_bucket") {
        let le = parse_bound(sample.label("le")?)?;
        let bound = if le.is_finite() { le * scale } else { le };
        Some((HistogramPart::Bucket(BucketBound(bound)), sample.value))
    } else if name.ends_with("_sum") {
        Some((HistogramPart::Sum, sample.value * scale))
    } else if name.ends_with("_count") {
        Some((HistogramPart::Count, sample.value))
    } else {
        None
    }
}

fn parse_bound(raw: &str) -> Option<f64> {
    let bound = match raw {
        "+Inf" | "Inf" => f64::INFINITY,
        other => other.parse::<f64>().ok()?,
    };
    (!bound.is_nan()).then_some(bound)
}

struct MeshContext {
    direction: Direction,
    pod: String,
    workload: ServiceKey,
    dst: ServiceKey,
    status_code: String,
    target_port: Option<u16>,
    authority: Option<String>,
    route: Option<String>,
}

fn mesh_context(sample: &RawSample) -> Option<MeshContext> {
    let direction = match sample.label("direction")? {
        "inbound" => Direction::Inbound,
        "outbound" => Direction::Outbound,
        _ => return None,
    };

    let pod = sample.label("pod").unwrap_or_default().to_string();
    let namespace = sample.label("namespace").unwrap_or_default().to_string();
    let workload_name = sample
        .first_label(WORKLOAD_LABELS)
        .unwrap_or(pod.as_str())
        .to_string();
    let workload = ServiceKey::new(namespace, workload_name);
    let authority = sample.label("authority").map(str::to_string);

    let dst = match direction {
        Direction::Inbound => workload.clone(),
        Direction::Outbound => match sample.first_label(DST_WORKLOAD_LABELS) {
            Some(name) => ServiceKey::new(
                sample
                    .label("dst_namespace")
                    .unwrap_or(workload.namespace.as_str()),
                name,
            ),
            None => authority
                .as_deref()
                .and_then(service_from_authority)
                .unwrap_or_else(|| ServiceKey::new("", "")),
        },
    };

    Some(MeshContext {
        direction,
        pod,
        workload,
        dst,
        status_code: sample.label("status_code").unwrap_or_default().to_string(),
        target_port: sample.label("target_addr").and_then(port_of),
        authority,
        route: sample.label("route_name").map(str::to_string),
    })
}

fn mesh_response(sample: &RawSample) -> Option<NormalizedSample> {
    let ctx = mesh_context(sample)?;
    let classification = match sample.label("classification") {
        Some(class) => class.to_string(),
        None if ctx.status_code.starts_with('5') => "failure".to_string(),
        None => "success".to_string(),
    };

    Some(NormalizedSample::MeshResponse(MeshResponse {
        direction: ctx.direction,
        pod: ctx.pod,
        workload: ctx.workload,
        dst: ctx.dst,
        status_code: ctx.status_code,
        classification,
        tls: sample.label("tls") == Some("true"),
        target_port: ctx.target_port,
        authority: ctx.authority,
        route: ctx.route,
        value: sample.value,
    }))
}

fn mesh_latency(sample: &RawSample) -> Option<NormalizedSample> {
    let (part, value) = histogram_part(sample, 1.0)?;
    let ctx = mesh_context(sample)?;

    Some(NormalizedSample::MeshLatency(MeshLatency {
        direction: ctx.direction,
        pod: ctx.pod,
        workload: ctx.workload,
        dst: ctx.dst,
        status_code: ctx.status_code,
        target_port: ctx.target_port,
        authority: ctx.authority,
        route: ctx.route,
        part,
        value,
    }))
}

/// `web.shop.svc.cluster.local:8080` -> `shop/web`
fn service_from_authority(authority: &str) -> Option<ServiceKey> {
    let host = strip_port(authority);
    let mut parts = host.split('.');
    let name = parts.next().filter(|n| !n.is_empty())?;
    let namespace = parts.next().unwrap_or_default();
    Some(ServiceKey::new(namespace, name))
}

fn strip_port(addr: &str) -> &str {
    match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    }
}

fn port_of(addr: &str) -> Option<u16> {
    addr.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
}
