//! Command-line interface for kubepulse.
//!
//! `kubepulse replay scrape-*.prom` feeds exposition dumps through the engine
//! as successive scrape cycles and prints the resulting aggregates and time
//! series as JSON.

use crate::core::config::{ConfigBuilder, LoggingConfig};
use crate::core::{Config, KubepulseError, Result};
use crate::metrics::concentrator::{NodePoint, SloPoint, TimeSeriesEntity};
use crate::metrics::{parse_exposition, AggregatedMetric, CycleStats, NodeMetrics, Normalizer, TelemetryEngine};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Kubernetes telemetry delta and aggregation engine
#[derive(Parser, Debug)]
#[command(name = "kubepulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/kubepulse/config.yaml)
    #[arg(short, long, env = "KUBEPULSE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "KUBEPULSE_DEBUG", global = true)]
    pub debug: bool,

    /// Structured log output with targets and line numbers
    #[arg(long, env = "KUBEPULSE_LOG_JSON", global = true)]
    pub json: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay exposition dumps as successive scrape cycles
    Replay {
        /// Exposition files, one per scrape, in scrape order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Seconds between replayed scrapes (default: engine.scrape_interval)
        #[arg(long, env = "KUBEPULSE_SCRAPE_INTERVAL")]
        interval: Option<u64>,

        /// Node name for node-exporter samples without a node label
        #[arg(long)]
        node: Option<String>,
    },
}

/// Where the configuration came from, logged once logging is up
enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        self.load_config_with_source().await.map(|(config, _)| config)
    }

    async fn load_config_with_source(&self) -> Result<(Config, ConfigSource)> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => {
                let default_path = Config::default_path();
                if !default_path.exists() {
                    return Ok((self.build_config_from_args(builder)?, ConfigSource::Defaults));
                }
                default_path
            }
        };

        if !config_path.exists() {
            return Err(KubepulseError::NotFound(format!("Config file {:?}", config_path)));
        }
        let content = tokio::fs::read_to_string(&config_path).await.map_err(|e| {
            KubepulseError::config(format!("Failed to read config file {:?}: {}", config_path, e))
        })?;
        builder = builder.from_yaml(&content)?;

        Ok((self.build_config_from_args(builder)?, ConfigSource::File(config_path)))
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(Command::Replay {
            interval: Some(secs), ..
        }) = &self.command
        {
            builder = builder.scrape_interval(Duration::from_secs(*secs));
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging.
    ///
    /// `--debug` wins over `KUBEPULSE_LOG_LEVEL`, which wins over
    /// `RUST_LOG` and finally the configured level.
    pub fn init_logging(&self, logging: &LoggingConfig) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let filter = if self.debug {
            EnvFilter::new("debug")
        } else if let Ok(level) = std::env::var("KUBEPULSE_LOG_LEVEL") {
            EnvFilter::new(level)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()))
        };

        let fmt_layer = if self.json || logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        // stdout carries the JSON report
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| KubepulseError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Per-file outcome of a replay
#[derive(Debug, Serialize)]
pub struct ReplayCycle {
    pub file: PathBuf,
    pub collected_at: DateTime<Utc>,
    pub skipped_lines: usize,
    pub stats: CycleStats,
}

/// Everything a replay prints
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub cycles: Vec<ReplayCycle>,
    pub aggregates: Vec<AggregatedMetric>,
    pub nodes: Vec<NodeMetrics>,
    pub node_series: Vec<TimeSeriesEntity<NodePoint>>,
    pub slo_series: Vec<TimeSeriesEntity<SloPoint>>,
}

/// Feed `files` through a fresh engine as scrapes `interval` apart, the last
/// one collected at `end`.
pub async fn replay(
    config: &Config,
    files: &[PathBuf],
    node: Option<&str>,
    end: DateTime<Utc>,
) -> Result<ReplayReport> {
    let mut normalizer = Normalizer::new();
    if let Some(node) = node {
        normalizer = normalizer.with_default_node(node);
    }
    let engine = TelemetryEngine::from_config(config)?.with_normalizer(normalizer);

    let interval = chrono::Duration::from_std(config.engine.scrape_interval)
        .map_err(|e| KubepulseError::config(format!("scrape_interval out of range: {}", e)))?;
    let mut collected_at = end - interval * (files.len().saturating_sub(1) as i32);
    let mut cycles = Vec::with_capacity(files.len());

    for file in files {
        let text = tokio::fs::read_to_string(file).await?;
        let batch = parse_exposition(&text);
        if batch.skipped > 0 {
            tracing::warn!(file = %file.display(), skipped = batch.skipped, "Skipped malformed lines");
        }

        engine.ingest(&batch.samples, collected_at);
        let stats = engine.last_stats();
        tracing::info!(
            file = %file.display(),
            samples = stats.raw_samples,
            aggregates = stats.aggregates,
            resets = stats.resets,
            "Replayed scrape"
        );

        cycles.push(ReplayCycle {
            file: file.clone(),
            collected_at,
            skipped_lines: batch.skipped,
            stats,
        });
        collected_at += interval;
    }

    let concentrator = engine.concentrator();
    Ok(ReplayReport {
        cycles,
        aggregates: engine.compute_aggregates(),
        nodes: engine.compute_node_metrics(),
        node_series: concentrator.flush_node_series_at(end),
        slo_series: concentrator.flush_slo_series_at(end),
    })
}

/// Execute the kubepulse command line.
pub async fn execute(cli: Cli) -> Result<()> {
    let (config, source) = cli.load_config_with_source().await?;
    cli.init_logging(&config.logging)?;

    match &source {
        ConfigSource::File(path) => tracing::info!("Loaded configuration from: {:?}", path),
        ConfigSource::Defaults => tracing::debug!("No config file found, using defaults"),
    }

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  Scrape interval: {:?}", config.engine.scrape_interval);
        println!("  Default window: {:?}", config.engine.default_window);
        println!("  Ring capacity: {} minutes", config.concentrator.ring_capacity);
        println!("  Denied namespaces: {}", config.filter.denied_namespaces.join(", "));
        return Ok(());
    }

    match &cli.command {
        Some(Command::Replay { files, node, .. }) => {
            let report = replay(&config, files, node.as_deref(), Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        None => Err(KubepulseError::config(
            "No command given, try `kubepulse replay <FILES>` or --check-config",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_args() {
        let cli = Cli::try_parse_from(["kubepulse", "--debug", "replay", "a.prom", "b.prom", "--interval", "10"])
            .unwrap();
        assert!(cli.debug);
        match cli.command {
            Some(Command::Replay { files, interval, node }) => {
                assert_eq!(files.len(), 2);
                assert_eq!(interval, Some(10));
                assert_eq!(node, None);
            }
            None => panic!("Expected replay"),
        }
    }

    #[test]
    fn test_replay_requires_files() {
        assert!(Cli::try_parse_from(["kubepulse", "replay"]).is_err());
    }

    #[test]
    fn test_interval_flag_overrides_config() {
        let cli = Cli::try_parse_from(["kubepulse", "replay", "a.prom", "--interval", "30"]).unwrap();
        let config = cli.build_config_from_args(ConfigBuilder::new()).unwrap();
        assert_eq!(config.engine.scrape_interval, Duration::from_secs(30));
    }
}
