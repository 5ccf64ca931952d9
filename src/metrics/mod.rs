//! Telemetry delta and aggregation engine.
//!
//! Cumulative counters and histograms scraped from independently restarting
//! pods flow through the stages below once per scrape cycle:
//!
//! - `exposition`: Prometheus text format to [`RawSample`]
//! - `normalize`: vendor label schemas to typed families
//! - `filter`: drop probes, admin ports and platform namespaces
//! - `delta`: per-entity increments with counter reset detection
//! - `aggregator`: ingress, service and edge SLOs
//! - `concentrator`: one hour of minute-aligned points per entity
//!
//! [`TelemetryEngine`] wires the stages together.

pub mod aggregator;
pub mod concentrator;
pub mod delta;
pub mod engine;
pub mod exposition;
pub mod filter;
pub mod histogram;
pub mod node;
pub mod normalize;
pub mod rate;
pub mod snapshot;
pub mod types;
pub mod window;

pub use aggregator::{AggregatedMetric, IngressSlo, LatencySummary, ServiceEdge, ServiceSlo};
pub use concentrator::{Concentrator, NodePoint, Ring, SloPoint, TimeSeriesEntity, TimeSeriesPoint};
pub use delta::{CycleDeltas, DeltaEngine, DeltaStats};
pub use engine::{CycleOutput, CycleStats, TelemetryEngine};
pub use exposition::{parse_exposition, ExpositionBatch};
pub use filter::TrafficFilter;
pub use histogram::{histogram_percentile, window_bucket_deltas, LatencyHistogram, Percentiles};
pub use node::{NodeMetrics, NodeMetricsConverter};
pub use normalize::Normalizer;
pub use rate::{counter_delta, delta, rate, ResetPolicy};
pub use snapshot::SnapshotDeltaTracker;
pub use types::{EntityKey, MetricKind, NormalizedSample, RawSample};
pub use window::{summarize_window, CumulativeSnapshot, WindowQuery, WindowSummary};
