//! Kubepulse - Kubernetes telemetry delta and aggregation engine.
//!
//! Kubepulse turns cumulative counters and histograms scraped from
//! Linkerd proxies, Traefik/nginx/Kong ingress controllers and
//! node-exporter into per-cycle rates, success ratios and latency
//! percentiles, and keeps an hour of minute-level history for dashboards.
//!
//! # Features
//!
//! - **Reset-safe deltas**: per-pod counters are summed then diffed, restarts never spike
//! - **Mergeable latency**: histograms combine bucket-wise before percentiles
//! - **Bounded memory**: fixed 60-slot ring per entity
//! - **Non-blocking reads**: each cycle's output is published atomically
//!
//! # Architecture
//!
//! - `metrics`: exposition reader, normalizer, filter, delta engine, aggregator
//! - `core`: configuration, errors and shared keys
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use kubepulse_lib::metrics::{parse_exposition, TelemetryEngine};
//!
//! let engine = TelemetryEngine::new();
//! let batch = parse_exposition("response_total{direction=\"inbound\"} 1\n");
//! engine.ingest(&batch.samples, chrono::Utc::now());
//! for metric in engine.compute_aggregates() {
//!     println!("{}", metric.entity_name());
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod metrics;

// Re-export core types for convenience
pub use crate::core::{Config, KubepulseError, Result};
pub use crate::metrics::TelemetryEngine;
