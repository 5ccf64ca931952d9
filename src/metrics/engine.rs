//! Scrape-cycle driver: normalize, filter, diff, aggregate, retain.
//!
//! One [`TelemetryEngine`] lives for the whole process. `ingest` runs a full
//! cycle under a single mutex, then publishes the cycle's output with an
//! atomic pointer swap so dashboard readers never wait on a scrape.

use crate::core::{Config, Result};
use crate::metrics::aggregator::{aggregate, AggregatedMetric};
use crate::metrics::concentrator::Concentrator;
use crate::metrics::delta::{DeltaEngine, DeltaStats};
use crate::metrics::filter::TrafficFilter;
use crate::metrics::node::{NodeMetrics, NodeMetricsConverter};
use crate::metrics::normalize::Normalizer;
use crate::metrics::types::RawSample;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Counters describing one ingest cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CycleStats {
    pub raw_samples: usize,
    /// Samples recognised by the normalizer
    pub normalized: usize,
    /// Samples dropped as non-business traffic
    pub filtered: usize,
    pub first_seen: usize,
    pub resets: usize,
    pub deltas: usize,
    pub aggregates: usize,
    pub nodes: usize,
    pub window_seconds: f64,
}

impl CycleStats {
    fn record_deltas(&mut self, stats: DeltaStats) {
        self.first_seen = stats.first_seen;
        self.resets = stats.resets;
        self.deltas = stats.emitted;
    }
}

/// Everything one cycle produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleOutput {
    pub collected_at: Option<DateTime<Utc>>,
    pub aggregates: Vec<AggregatedMetric>,
    pub nodes: Vec<NodeMetrics>,
    pub stats: CycleStats,
}

#[derive(Debug, Default)]
struct EngineState {
    deltas: DeltaEngine,
    nodes: NodeMetricsConverter,
    last_ingest: Option<DateTime<Utc>>,
}

/// Telemetry delta and aggregation engine
#[derive(Debug)]
pub struct TelemetryEngine {
    normalizer: Normalizer,
    filter: TrafficFilter,
    scrape_interval: Duration,
    state: Mutex<EngineState>,
    output: ArcSwap<CycleOutput>,
    concentrator: Arc<Concentrator>,
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::with_parts(
            Normalizer::new(),
            TrafficFilter::default(),
            Duration::from_secs(15),
            Arc::new(Concentrator::default()),
        )
    }
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an engine from validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_parts(
            Normalizer::new(),
            TrafficFilter::new(&config.filter)?,
            config.engine.scrape_interval,
            Arc::new(Concentrator::new(config.concentrator.ring_capacity)),
        ))
    }

    pub fn with_parts(
        normalizer: Normalizer,
        filter: TrafficFilter,
        scrape_interval: Duration,
        concentrator: Arc<Concentrator>,
    ) -> Self {
        Self {
            normalizer,
            filter,
            scrape_interval,
            state: Mutex::new(EngineState::default()),
            output: ArcSwap::from_pointee(CycleOutput::default()),
            concentrator,
        }
    }

    /// Replace the normalizer, e.g. to name the node of a single-node scrape
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn concentrator(&self) -> &Arc<Concentrator> {
        &self.concentrator
    }

    /// Run one scrape cycle.
    ///
    /// The window is the wall-clock time since the previous ingest, or the
    /// configured scrape interval on the first cycle or when the clock did
    /// not advance.
    pub fn ingest(&self, samples: &[RawSample], collected_at: DateTime<Utc>) {
        self.run_cycle(samples, collected_at, None);
    }

    /// Run one scrape cycle with an explicit window length.
    ///
    /// A window that is not a positive finite number falls back to the
    /// scrape interval.
    pub fn ingest_with_window(&self, samples: &[RawSample], window_secs: f64) {
        self.run_cycle(samples, Utc::now(), Some(window_secs));
    }

    fn run_cycle(&self, samples: &[RawSample], collected_at: DateTime<Utc>, window: Option<f64>) {
        let mut state = self.state.lock();

        let window_secs = window
            .or_else(|| {
                state
                    .last_ingest
                    .map(|last| (collected_at - last).num_milliseconds() as f64 / 1000.0)
            })
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .unwrap_or_else(|| self.scrape_interval.as_secs_f64());

        let mut stats = CycleStats {
            raw_samples: samples.len(),
            window_seconds: window_secs,
            ..CycleStats::default()
        };

        let mut normalized = self.normalizer.normalize_all(samples);
        stats.normalized = normalized.len();
        stats.filtered = self.filter.retain(&mut normalized);

        let deltas = state.deltas.process(&normalized);
        stats.record_deltas(deltas.stats);
        let aggregates = aggregate(&deltas, window_secs);
        let nodes = state.nodes.convert(&normalized, collected_at);
        state.last_ingest = Some(collected_at);

        stats.aggregates = aggregates.len();
        stats.nodes = nodes.len();

        self.concentrator.ingest(&nodes, &aggregates, collected_at);
        self.output.store(Arc::new(CycleOutput {
            collected_at: Some(collected_at),
            aggregates,
            nodes,
            stats,
        }));

        tracing::debug!(
            raw = stats.raw_samples,
            normalized = stats.normalized,
            filtered = stats.filtered,
            first_seen = stats.first_seen,
            resets = stats.resets,
            deltas = stats.deltas,
            aggregates = stats.aggregates,
            window_secs,
            "Ingest cycle complete"
        );
    }

    /// Aggregates of the last completed cycle, empty before the first
    pub fn compute_aggregates(&self) -> Vec<AggregatedMetric> {
        self.output.load().aggregates.clone()
    }

    /// Node utilisation of the last completed cycle
    pub fn compute_node_metrics(&self) -> Vec<NodeMetrics> {
        self.output.load().nodes.clone()
    }

    pub fn last_stats(&self) -> CycleStats {
        self.output.load().stats
    }

    /// Shared handle to the last cycle's output
    pub fn last_output(&self) -> Arc<CycleOutput> {
        self.output.load_full()
    }
}
