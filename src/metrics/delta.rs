//! Per-entity delta engine.
//!
//! Turns cumulative counters and histograms into per-cycle increments. Each
//! metric family keeps the merged values of the previous cycle keyed by
//! [`EntityKey`]; a cycle:
//!
//! 1. sums this cycle's samples that share a key (different upstream label
//!    dimensions are additive contributions, not duplicates),
//! 2. diffs each merged value against the previous cycle under
//!    [`ResetPolicy::Skip`],
//! 3. stays silent for keys seen for the first time,
//! 4. replaces the family's previous-value map with the merged values.
//!
//! The previous-value map is rebuilt from scratch and swapped in one
//! assignment, never mutated in place, so entities that vanished simply
//! drop out.

use crate::core::ServiceKey;
use crate::metrics::histogram::LatencyHistogram;
use crate::metrics::rate::{counter_delta, ResetPolicy};
use crate::metrics::types::{
    BucketBound, Direction, EntityKey, HistogramPart, IngressLatency, IngressRequest, MeshLatency,
    MeshResponse, NormalizedSample,
};
use ahash::AHashMap;

/// Reset policy of every per-entity family in this engine
pub const ENTITY_RESET_POLICY: ResetPolicy = ResetPolicy::Skip;

/// Routing labels of an ingress entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressMeta {
    pub service_key: String,
    pub code: String,
    pub method: String,
}

impl From<&IngressRequest> for IngressMeta {
    fn from(req: &IngressRequest) -> Self {
        Self {
            service_key: req.service_key.clone(),
            code: req.code.clone(),
            method: req.method.clone(),
        }
    }
}

impl From<&IngressLatency> for IngressMeta {
    fn from(lat: &IngressLatency) -> Self {
        Self {
            service_key: lat.service_key.clone(),
            code: lat.code.clone(),
            method: lat.method.clone(),
        }
    }
}

/// Routing labels of a mesh response entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshResponseMeta {
    pub direction: Direction,
    pub workload: ServiceKey,
    pub dst: ServiceKey,
    pub status_code: String,
    pub classification: String,
    pub tls: bool,
}

impl From<&MeshResponse> for MeshResponseMeta {
    fn from(resp: &MeshResponse) -> Self {
        Self {
            direction: resp.direction,
            workload: resp.workload.clone(),
            dst: resp.dst.clone(),
            status_code: resp.status_code.clone(),
            classification: resp.classification.clone(),
            tls: resp.tls,
        }
    }
}

/// Routing labels of a mesh latency entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshLatencyMeta {
    pub direction: Direction,
    pub workload: ServiceKey,
    pub dst: ServiceKey,
    pub status_code: String,
}

impl From<&MeshLatency> for MeshLatencyMeta {
    fn from(lat: &MeshLatency) -> Self {
        Self {
            direction: lat.direction,
            workload: lat.workload.clone(),
            dst: lat.dst.clone(),
            status_code: lat.status_code.clone(),
        }
    }
}

/// Counter increment of one entity for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord<M> {
    pub key: EntityKey,
    pub meta: M,
    /// Never negative
    pub delta: f64,
}

/// Histogram increments of one entity for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDeltaRecord<M> {
    pub key: EntityKey,
    pub meta: M,
    pub histogram: LatencyHistogram,
}

/// Bookkeeping of one family advance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    /// Keys (or histogram series) seen for the first time
    pub first_seen: usize,
    /// Counters that went backwards and were skipped
    pub resets: usize,
    /// Records emitted
    pub emitted: usize,
}

impl DeltaStats {
    fn absorb(&mut self, other: DeltaStats) {
        self.first_seen += other.first_seen;
        self.resets += other.resets;
        self.emitted += other.emitted;
    }
}

/// Previous-cycle store of one counter family
#[derive(Debug, Default)]
pub struct CounterFamily {
    name: &'static str,
    previous: AHashMap<EntityKey, f64>,
}

impl CounterFamily {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            previous: AHashMap::new(),
        }
    }

    /// Merged value recorded for `key` by the last cycle
    pub fn previous(&self, key: &EntityKey) -> Option<f64> {
        self.previous.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    /// Diff this cycle's merged values and swap in the new store
    pub fn advance<M>(
        &mut self,
        current: AHashMap<EntityKey, (M, f64)>,
    ) -> (Vec<DeltaRecord<M>>, DeltaStats) {
        let mut next = AHashMap::with_capacity(current.len());
        let mut records = Vec::with_capacity(current.len());
        let mut stats = DeltaStats::default();

        for (key, (meta, value)) in current {
            match self.previous.get(&key) {
                None => stats.first_seen += 1,
                Some(&prev) => match counter_delta(value, prev, ENTITY_RESET_POLICY) {
                    Some(delta) => records.push(DeltaRecord {
                        key: key.clone(),
                        meta,
                        delta,
                    }),
                    None => {
                        stats.resets += 1;
                        tracing::trace!(family = self.name, key = %key, prev, value, "Counter reset");
                    },
                },
            }
            next.insert(key, value);
        }

        stats.emitted = records.len();
        self.previous = next;
        (records, stats)
    }
}

/// Merged cumulative state of one histogram entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramCumulative {
    pub buckets: AHashMap<BucketBound, f64>,
    pub sum: Option<f64>,
    pub count: Option<f64>,
}

impl HistogramCumulative {
    fn add(&mut self, part: HistogramPart, value: f64) {
        match part {
            HistogramPart::Bucket(bound) => *self.buckets.entry(bound).or_insert(0.0) += value,
            HistogramPart::Sum => *self.sum.get_or_insert(0.0) += value,
            HistogramPart::Count => *self.count.get_or_insert(0.0) += value,
        }
    }
}

/// Previous-cycle store of one histogram family.
///
/// Every bucket, the sum and the count are independent counters under the
/// same reset policy.
#[derive(Debug, Default)]
pub struct HistogramFamily {
    name: &'static str,
    previous: AHashMap<EntityKey, HistogramCumulative>,
}

impl HistogramFamily {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            previous: AHashMap::new(),
        }
    }

    pub fn previous(&self, key: &EntityKey) -> Option<&HistogramCumulative> {
        self.previous.get(key)
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    pub fn advance<M>(
        &mut self,
        current: AHashMap<EntityKey, (M, HistogramCumulative)>,
    ) -> (Vec<HistogramDeltaRecord<M>>, DeltaStats) {
        let mut next = AHashMap::with_capacity(current.len());
        let mut records = Vec::with_capacity(current.len());
        let mut stats = DeltaStats::default();

        for (key, (meta, cumulative)) in current {
            let Some(prev) = self.previous.get(&key) else {
                stats.first_seen += 1;
                next.insert(key, cumulative);
                continue;
            };

            let mut histogram = LatencyHistogram::new();
            let mut produced = false;

            for (bound, value) in &cumulative.buckets {
                match prev.buckets.get(bound) {
                    None => stats.first_seen += 1,
                    Some(&before) => match counter_delta(*value, before, ENTITY_RESET_POLICY) {
                        Some(delta) => {
                            histogram.add_bucket(*bound, delta);
                            produced = true;
                        },
                        // keep the bound so the bucket layout survives
                        None => {
                            histogram.add_bucket(*bound, 0.0);
                            stats.resets += 1;
                        },
                    },
                }
            }

            if let (Some(value), Some(before)) = (cumulative.sum, prev.sum) {
                match counter_delta(value, before, ENTITY_RESET_POLICY) {
                    Some(delta) => {
                        histogram.add_sum(delta);
                        produced = true;
                    },
                    None => stats.resets += 1,
                }
            }

            if let (Some(value), Some(before)) = (cumulative.count, prev.count) {
                match counter_delta(value, before, ENTITY_RESET_POLICY) {
                    Some(delta) => {
                        histogram.add_count(delta);
                        produced = true;
                    },
                    None => stats.resets += 1,
                }
            }

            if produced {
                records.push(HistogramDeltaRecord {
                    key: key.clone(),
                    meta,
                    histogram,
                });
            } else {
                tracing::trace!(family = self.name, key = %key, "Histogram produced no increments");
            }
            next.insert(key, cumulative);
        }

        stats.emitted = records.len();
        self.previous = next;
        (records, stats)
    }
}

/// All increments produced by one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleDeltas {
    pub ingress_requests: Vec<DeltaRecord<IngressMeta>>,
    pub ingress_latency: Vec<HistogramDeltaRecord<IngressMeta>>,
    pub mesh_responses: Vec<DeltaRecord<MeshResponseMeta>>,
    pub mesh_latency: Vec<HistogramDeltaRecord<MeshLatencyMeta>>,
    pub stats: DeltaStats,
}

impl CycleDeltas {
    pub fn is_empty(&self) -> bool {
        self.ingress_requests.is_empty()
            && self.ingress_latency.is_empty()
            && self.mesh_responses.is_empty()
            && self.mesh_latency.is_empty()
    }
}

/// Stateful delta engine over the ingress and mesh families
#[derive(Debug)]
pub struct DeltaEngine {
    ingress_requests: CounterFamily,
    ingress_latency: HistogramFamily,
    mesh_responses: CounterFamily,
    mesh_latency: HistogramFamily,
}

impl Default for DeltaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaEngine {
    pub fn new() -> Self {
        Self {
            ingress_requests: CounterFamily::new("ingress_requests"),
            ingress_latency: HistogramFamily::new("ingress_latency"),
            mesh_responses: CounterFamily::new("mesh_responses"),
            mesh_latency: HistogramFamily::new("mesh_latency"),
        }
    }

    pub fn ingress_requests(&self) -> &CounterFamily {
        &self.ingress_requests
    }

    pub fn ingress_latency(&self) -> &HistogramFamily {
        &self.ingress_latency
    }

    pub fn mesh_responses(&self) -> &CounterFamily {
        &self.mesh_responses
    }

    pub fn mesh_latency(&self) -> &HistogramFamily {
        &self.mesh_latency
    }

    /// Run one cycle over already filtered samples.
    ///
    /// Node samples are ignored here, the node converter owns them.
    pub fn process(&mut self, samples: &[NormalizedSample]) -> CycleDeltas {
        let mut ingress_requests: AHashMap<EntityKey, (IngressMeta, f64)> = AHashMap::new();
        let mut ingress_latency: AHashMap<EntityKey, (IngressMeta, HistogramCumulative)> =
            AHashMap::new();
        let mut mesh_responses: AHashMap<EntityKey, (MeshResponseMeta, f64)> = AHashMap::new();
        let mut mesh_latency: AHashMap<EntityKey, (MeshLatencyMeta, HistogramCumulative)> =
            AHashMap::new();

        for sample in samples {
            match sample {
                NormalizedSample::IngressRequest(req) => {
                    ingress_requests
                        .entry(req.entity_key())
                        .or_insert_with(|| (IngressMeta::from(req), 0.0))
                        .1 += req.value;
                },
                NormalizedSample::IngressLatency(lat) => {
                    ingress_latency
                        .entry(lat.entity_key())
                        .or_insert_with(|| (IngressMeta::from(lat), HistogramCumulative::default()))
                        .1
                        .add(lat.part, lat.value);
                },
                NormalizedSample::MeshResponse(resp) => {
                    mesh_responses
                        .entry(resp.entity_key())
                        .or_insert_with(|| (MeshResponseMeta::from(resp), 0.0))
                        .1 += resp.value;
                },
                NormalizedSample::MeshLatency(lat) => {
                    mesh_latency
                        .entry(lat.entity_key())
                        .or_insert_with(|| (MeshLatencyMeta::from(lat), HistogramCumulative::default()))
                        .1
                        .add(lat.part, lat.value);
                },
                NormalizedSample::Node(_) => {},
            }
        }

        let mut out = CycleDeltas::default();

        let (records, stats) = self.ingress_requests.advance(ingress_requests);
        out.ingress_requests = records;
        out.stats.absorb(stats);

        let (records, stats) = self.ingress_latency.advance(ingress_latency);
        out.ingress_latency = records;
        out.stats.absorb(stats);

        let (records, stats) = self.mesh_responses.advance(mesh_responses);
        out.mesh_responses = records;
        out.stats.absorb(stats);

        let (records, stats) = self.mesh_latency.advance(mesh_latency);
        out.mesh_latency = records;
        out.stats.absorb(stats);

        tracing::debug!(
            emitted = out.stats.emitted,
            first_seen = out.stats.first_seen,
            resets = out.stats.resets,
            "Delta cycle complete"
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::types::IngressVendor;

    fn mesh(pod: &str, client: &str, value: f64) -> NormalizedSample {
        NormalizedSample::MeshResponse(MeshResponse {
            direction: Direction::Inbound,
            pod: pod.to_string(),
            workload: ServiceKey::new("shop", "web"),
            dst: ServiceKey::new("shop", "web"),
            status_code: "200".to_string(),
            classification: "success".to_string(),
            tls: true,
            target_port: Some(8080),
            // differs per row but is not part of the entity key
            authority: Some(client.to_string()),
            route: None,
            value,
        })
    }

    fn ingress_bucket(le: f64, value: f64) -> NormalizedSample {
        NormalizedSample::IngressLatency(IngressLatency {
            vendor: IngressVendor::Traefik,
            service_key: "api@file".to_string(),
            namespace: None,
            path: None,
            code: "200".to_string(),
            method: "GET".to_string(),
            part: HistogramPart::Bucket(BucketBound(le)),
            value,
        })
    }

    #[test]
    fn test_first_cycle_is_silent_but_recorded() {
        let mut engine = DeltaEngine::new();
        let sample = mesh("web-1", "a", 100.0);
        let key = match &sample {
            NormalizedSample::MeshResponse(r) => r.entity_key(),
            _ => unreachable!(),
        };

        let out = engine.process(&[sample]);
        assert!(out.is_empty());
        assert_eq!(out.stats.first_seen, 1);
        assert_eq!(engine.mesh_responses().previous(&key), Some(100.0));
    }

    #[test]
    fn test_delta_then_reset_is_skipped() {
        let mut engine = DeltaEngine::new();
        engine.process(&[mesh("web-1", "a", 100.0)]);

        let out = engine.process(&[mesh("web-1", "a", 150.0)]);
        assert_eq!(out.mesh_responses.len(), 1);
        assert_eq!(out.mesh_responses[0].delta, 50.0);

        // restart: neither -140 nor 10
        let out = engine.process(&[mesh("web-1", "a", 10.0)]);
        assert!(out.mesh_responses.is_empty());
        assert_eq!(out.stats.resets, 1);

        // the reset value is the new baseline
        let out = engine.process(&[mesh("web-1", "a", 25.0)]);
        assert_eq!(out.mesh_responses[0].delta, 15.0);
    }

    #[test]
    fn test_same_key_rows_are_summed_before_diffing() {
        let mut engine = DeltaEngine::new();
        engine.process(&[mesh("web-1", "a", 100.0), mesh("web-1", "b", 50.0)]);

        // one client row went down, the other up: merged total rose by 10
        let out = engine.process(&[mesh("web-1", "a", 90.0), mesh("web-1", "b", 70.0)]);
        assert_eq!(out.mesh_responses.len(), 1);
        assert_eq!(out.mesh_responses[0].delta, 10.0);
        assert_eq!(out.stats.resets, 0);
    }

    #[test]
    fn test_vanished_entities_are_dropped_from_store() {
        let mut engine = DeltaEngine::new();
        engine.process(&[mesh("web-1", "a", 100.0), mesh("web-2", "a", 10.0)]);
        assert_eq!(engine.mesh_responses().len(), 2);

        engine.process(&[mesh("web-2", "a", 20.0)]);
        assert_eq!(engine.mesh_responses().len(), 1);

        // web-1 returns: treated as a first sighting again
        let out = engine.process(&[mesh("web-1", "a", 500.0), mesh("web-2", "a", 30.0)]);
        assert_eq!(out.mesh_responses.len(), 1);
        assert_eq!(out.stats.first_seen, 1);
    }

    #[test]
    fn test_histogram_buckets_reset_independently() {
        let mut engine = DeltaEngine::new();
        engine.process(&[ingress_bucket(100.0, 10.0), ingress_bucket(f64::INFINITY, 12.0)]);

        let out = engine.process(&[ingress_bucket(100.0, 4.0), ingress_bucket(f64::INFINITY, 20.0)]);
        assert_eq!(out.ingress_latency.len(), 1);
        let counts = out.ingress_latency[0].histogram.bucket_counts();
        // le=100 reset and contributed nothing, +Inf grew by 8
        assert_eq!(counts.counts.as_slice(), &[0, 8]);
        assert_eq!(out.stats.resets, 1);
    }

    #[test]
    fn test_new_bucket_on_known_entity_is_silent() {
        let mut engine = DeltaEngine::new();
        engine.process(&[ingress_bucket(100.0, 10.0)]);
        let out = engine.process(&[ingress_bucket(100.0, 15.0), ingress_bucket(250.0, 15.0)]);

        assert_eq!(out.ingress_latency.len(), 1);
        assert_eq!(out.stats.first_seen, 1);
    }
}
