//! Configuration management for kubepulse.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable and CLI overrides (applied by the CLI)
//! - Validation and defaults

use crate::core::{KubepulseError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for kubepulse
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delta engine and aggregation settings
    pub engine: EngineConfig,
    /// Business traffic filter settings
    pub filter: FilterConfig,
    /// Rolling time-series cache settings
    pub concentrator: ConcentratorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Expected interval between scrapes, used as the rate window when the
    /// previous scrape time is unknown
    #[serde(with = "humantime_serde")]
    pub scrape_interval: Duration,
    /// Window used by historical queries that do not name one
    #[serde(with = "humantime_serde")]
    pub default_window: Duration,
}

/// Traffic filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Namespaces whose traffic is never business traffic
    pub denied_namespaces: Vec<String>,
    /// Proxy admin and metrics ports
    pub admin_ports: Vec<u16>,
    /// Regular expressions matched against request paths and authorities
    pub probe_paths: Vec<String>,
    /// Drop Traefik `@internal` services (dashboard, ping, prometheus)
    pub drop_internal_ingress_services: bool,
}

/// Concentrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcentratorConfig {
    /// Number of one-minute slots kept per entity
    pub ring_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured logging format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineConfig::default(),
            filter: FilterConfig::default(),
            concentrator: ConcentratorConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            scrape_interval: Duration::from_secs(15),
            default_window: Duration::from_secs(300),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            denied_namespaces: vec![
                "kube-system".to_string(),
                "linkerd".to_string(),
                "linkerd-viz".to_string(),
            ],
            // linkerd-proxy admin, linkerd control plane admin, envoy admin
            admin_ports: vec![4191, 9990, 9901],
            probe_paths: vec![r"^/(healthz|readyz|livez|ping|health)\b".to_string()],
            drop_internal_ingress_services: true,
        }
    }
}

impl Default for ConcentratorConfig {
    fn default() -> Self {
        ConcentratorConfig { ring_capacity: 60 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.scrape_interval.is_zero() {
            return Err(KubepulseError::config("scrape_interval must be greater than 0"));
        }

        if self.engine.default_window.is_zero() {
            return Err(KubepulseError::config("default_window must be greater than 0"));
        }

        if self.concentrator.ring_capacity == 0 {
            return Err(KubepulseError::config("ring_capacity must be greater than 0"));
        }

        for pattern in &self.filter.probe_paths {
            Regex::new(pattern).map_err(|e| {
                KubepulseError::config(format!("Invalid probe path pattern '{}': {}", pattern, e))
            })?;
        }

        if self.filter.admin_ports.contains(&0) {
            return Err(KubepulseError::config("admin_ports cannot contain port 0"));
        }

        Ok(())
    }

    /// Default on-disk location of the configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("kubepulse").join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/kubepulse/config.yaml"))
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)?;
        Ok(self)
    }

    /// Set the scrape interval
    pub fn scrape_interval(mut self, interval: Duration) -> Self {
        self.config.engine.scrape_interval = interval;
        self
    }

    /// Set the default historical query window
    pub fn default_window(mut self, window: Duration) -> Self {
        self.config.engine.default_window = window;
        self
    }

    /// Set the ring capacity in minutes
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.config.concentrator.ring_capacity = capacity;
        self
    }

    /// Replace the denied namespaces
    pub fn denied_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.filter.denied_namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Set the log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concentrator.ring_capacity, 60);
        assert_eq!(config.engine.default_window, Duration::from_secs(300));
    }

    #[test]
    fn test_zero_ring_capacity_rejected() {
        let result = ConfigBuilder::new().ring_capacity(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = ConfigBuilder::new().scrape_interval(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_probe_pattern_rejected() {
        let mut config = Config::default();
        config.filter.probe_paths.push("(unclosed".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid probe path pattern"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
engine:
  scrape_interval: 10s
  default_window: 5m
filter:
  denied_namespaces: ["monitoring"]
  admin_ports: [4191]
concentrator:
  ring_capacity: 120
logging:
  level: debug
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();
        assert_eq!(config.engine.scrape_interval, Duration::from_secs(10));
        assert_eq!(config.engine.default_window, Duration::from_secs(300));
        assert_eq!(config.filter.denied_namespaces, vec!["monitoring".to_string()]);
        assert_eq!(config.filter.admin_ports, vec![4191]);
        // untouched sections keep their defaults
        assert!(config.filter.drop_internal_ingress_services);
        assert_eq!(config.concentrator.ring_capacity, 120);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }
}
