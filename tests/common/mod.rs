//! Common test utilities and fixtures.

#![allow(dead_code)]

use kubepulse_lib::metrics::{MetricKind, RawSample};

/// Fixture builder for Linkerd `response_total` samples.
pub struct LinkerdSampleBuilder {
    pod: String,
    namespace: String,
    deployment: String,
    direction: &'static str,
    dst: Option<(String, String)>,
    status_code: String,
    classification: Option<&'static str>,
    tls: bool,
    target_addr: Option<String>,
    route: Option<String>,
}

impl LinkerdSampleBuilder {
    pub fn new(pod: &str) -> Self {
        Self {
            pod: pod.to_string(),
            namespace: "shop".to_string(),
            deployment: "web".to_string(),
            direction: "inbound",
            dst: None,
            status_code: "200".to_string(),
            classification: Some("success"),
            tls: true,
            target_addr: None,
            route: None,
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn deployment(mut self, deployment: &str) -> Self {
        self.deployment = deployment.to_string();
        self
    }

    pub fn outbound_to(mut self, namespace: &str, deployment: &str) -> Self {
        self.direction = "outbound";
        self.dst = Some((namespace.to_string(), deployment.to_string()));
        self
    }

    pub fn status(mut self, code: &str) -> Self {
        self.status_code = code.to_string();
        self
    }

    pub fn failure(mut self) -> Self {
        self.classification = Some("failure");
        self
    }

    pub fn plaintext(mut self) -> Self {
        self.tls = false;
        self
    }

    pub fn target_addr(mut self, addr: &str) -> Self {
        self.target_addr = Some(addr.to_string());
        self
    }

    pub fn route(mut self, route: &str) -> Self {
        self.route = Some(route.to_string());
        self
    }

    fn labels(&self, sample: RawSample) -> RawSample {
        let mut sample = sample
            .with_label("direction", self.direction)
            .with_label("namespace", &self.namespace)
            .with_label("pod", &self.pod)
            .with_label("deployment", &self.deployment)
            .with_label("status_code", &self.status_code)
            .with_label("tls", if self.tls { "true" } else { "no_identity" });
        if let Some((ns, name)) = &self.dst {
            sample = sample
                .with_label("dst_namespace", ns)
                .with_label("dst_deployment", name);
        }
        if let Some(addr) = &self.target_addr {
            sample = sample.with_label("target_addr", addr);
        }
        if let Some(route) = &self.route {
            sample = sample.with_label("route_name", route);
        }
        sample
    }

    /// `response_total` with the given cumulative value
    pub fn response(&self, value: f64) -> RawSample {
        let mut sample = self.labels(RawSample::new("response_total", MetricKind::Counter, value));
        if let Some(class) = self.classification {
            sample = sample.with_label("classification", class);
        }
        sample
    }

    /// `response_latency_ms_bucket{le}` with the given cumulative value
    pub fn latency_bucket(&self, le: &str, value: f64) -> RawSample {
        self.labels(RawSample::new("response_latency_ms_bucket", MetricKind::HistogramBucket, value))
            .with_label("le", le)
    }

    pub fn latency_count(&self, value: f64) -> RawSample {
        self.labels(RawSample::new("response_latency_ms_count", MetricKind::HistogramCount, value))
    }

    pub fn latency_sum(&self, value: f64) -> RawSample {
        self.labels(RawSample::new("response_latency_ms_sum", MetricKind::HistogramSum, value))
    }
}

/// Traefik `traefik_service_requests_total`
pub fn traefik_requests(service: &str, code: &str, method: &str, value: f64) -> RawSample {
    RawSample::new("traefik_service_requests_total", MetricKind::Counter, value)
        .with_label("service", service)
        .with_label("code", code)
        .with_label("method", method)
        .with_label("protocol", "http")
}

/// Traefik latency bucket, `le` in seconds
pub fn traefik_latency_bucket(service: &str, le: &str, value: f64) -> RawSample {
    RawSample::new(
        "traefik_service_request_duration_seconds_bucket",
        MetricKind::HistogramBucket,
        value,
    )
    .with_label("service", service)
    .with_label("code", "200")
    .with_label("method", "GET")
    .with_label("le", le)
}

pub fn traefik_latency_count(service: &str, value: f64) -> RawSample {
    RawSample::new(
        "traefik_service_request_duration_seconds_count",
        MetricKind::HistogramCount,
        value,
    )
    .with_label("service", service)
    .with_label("code", "200")
    .with_label("method", "GET")
}

/// ingress-nginx request counter, one per upstream `path`
pub fn nginx_requests(namespace: &str, service: &str, path: &str, status: &str, value: f64) -> RawSample {
    RawSample::new("nginx_ingress_controller_requests", MetricKind::Counter, value)
        .with_label("namespace", namespace)
        .with_label("service", service)
        .with_label("ingress", service)
        .with_label("path", path)
        .with_label("status", status)
        .with_label("method", "GET")
}

/// Kong `kong_http_requests_total`
pub fn kong_requests(service: &str, code: &str, value: f64) -> RawSample {
    RawSample::new("kong_http_requests_total", MetricKind::Counter, value)
        .with_label("service", service)
        .with_label("route", "default")
        .with_label("code", code)
}

/// node-exporter sample labelled with its node
pub fn node_sample(node: &str, name: &str, kind: MetricKind, value: f64) -> RawSample {
    RawSample::new(name, kind, value).with_label("node", node)
}

/// A minimal node-exporter scrape for `node`
pub fn node_scrape(node: &str, busy_secs: f64, idle_secs: f64) -> Vec<RawSample> {
    vec![
        node_sample(node, "node_cpu_seconds_total", MetricKind::Counter, busy_secs)
            .with_label("cpu", "0")
            .with_label("mode", "user"),
        node_sample(node, "node_cpu_seconds_total", MetricKind::Counter, idle_secs)
            .with_label("cpu", "0")
            .with_label("mode", "idle"),
        node_sample(node, "node_memory_MemTotal_bytes", MetricKind::Gauge, 16e9),
        node_sample(node, "node_memory_MemAvailable_bytes", MetricKind::Gauge, 4e9),
    ]
}

/// Macro for float comparisons with a tolerance.
#[macro_export]
macro_rules! assert_close {
    ($left:expr, $right:expr) => {
        $crate::assert_close!($left, $right, 1e-6)
    };
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let (left, right): (f64, f64) = ($left, $right);
        assert!(
            (left - right).abs() <= $tolerance,
            "{} is not within {} of {}",
            left,
            $tolerance,
            right
        );
    }};
}
