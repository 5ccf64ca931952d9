//! Business traffic filter.
//!
//! Drops samples that are not genuine user traffic: kubelet health probes,
//! requests to proxy admin ports, platform namespaces and Traefik's own
//! `@internal` services.

use crate::core::config::FilterConfig;
use crate::core::Result;
use crate::metrics::types::NormalizedSample;
use ahash::AHashSet;
use regex::RegexSet;

/// Compiled filter rules
#[derive(Debug, Clone)]
pub struct TrafficFilter {
    denied_namespaces: AHashSet<String>,
    admin_ports: AHashSet<u16>,
    probe_paths: RegexSet,
    drop_internal_ingress: bool,
}

impl Default for TrafficFilter {
    fn default() -> Self {
        // default patterns are validated by the config tests
        Self::new(&FilterConfig::default()).expect("default filter config compiles")
    }
}

impl TrafficFilter {
    /// Compile the filter from configuration
    pub fn new(config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            denied_namespaces: config.denied_namespaces.iter().cloned().collect(),
            admin_ports: config.admin_ports.iter().copied().collect(),
            probe_paths: RegexSet::new(&config.probe_paths)?,
            drop_internal_ingress: config.drop_internal_ingress_services,
        })
    }

    /// Keep only business traffic, returning the number of dropped samples
    pub fn retain(&self, samples: &mut Vec<NormalizedSample>) -> usize {
        let before = samples.len();
        samples.retain(|s| self.allows(s));
        before - samples.len()
    }

    /// True when the sample represents business traffic
    pub fn allows(&self, sample: &NormalizedSample) -> bool {
        match sample {
            NormalizedSample::IngressRequest(req) => self.allows_ingress(
                &req.service_key,
                req.namespace.as_deref(),
                req.path.as_deref(),
            ),
            NormalizedSample::IngressLatency(lat) => self.allows_ingress(
                &lat.service_key,
                lat.namespace.as_deref(),
                lat.path.as_deref(),
            ),
            NormalizedSample::MeshResponse(resp) => self.allows_mesh(
                &resp.workload.namespace,
                &resp.dst.namespace,
                resp.target_port,
                resp.route.as_deref(),
                resp.authority.as_deref(),
            ),
            NormalizedSample::MeshLatency(lat) => self.allows_mesh(
                &lat.workload.namespace,
                &lat.dst.namespace,
                lat.target_port,
                lat.route.as_deref(),
                lat.authority.as_deref(),
            ),
            NormalizedSample::Node(_) => true,
        }
    }

    fn allows_ingress(&self, service_key: &str, namespace: Option<&str>, path: Option<&str>) -> bool {
        if self.drop_internal_ingress && service_key.ends_with("@internal") {
            return false;
        }
        if namespace.is_some_and(|ns| self.denied_namespaces.contains(ns)) {
            return false;
        }
        if path.is_some_and(|p| self.probe_paths.is_match(p)) {
            return false;
        }
        true
    }

    fn allows_mesh(
        &self,
        namespace: &str,
        dst_namespace: &str,
        target_port: Option<u16>,
        route: Option<&str>,
        authority: Option<&str>,
    ) -> bool {
        if self.denied_namespaces.contains(namespace) || self.denied_namespaces.contains(dst_namespace) {
            return false;
        }
        if target_port.is_some_and(|p| self.admin_ports.contains(&p)) {
            return false;
        }
        // linkerd policy puts kubelet probes on a dedicated route
        if route.is_some_and(|r| r == "probe" || r.ends_with(":probe") || self.probe_paths.is_match(r)) {
            return false;
        }
        if authority.and_then(authority_port).is_some_and(|p| self.admin_ports.contains(&p)) {
            return false;
        }
        true
    }
}

fn authority_port(authority: &str) -> Option<u16> {
    authority.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
}
