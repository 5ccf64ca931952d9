//! Configuration system tests.

use clap::Parser;
use kubepulse_lib::cli::Cli;
use kubepulse_lib::core::config::LogLevel;
use kubepulse_lib::core::{Config, ConfigBuilder, KubepulseError};
use kubepulse_lib::metrics::{TelemetryEngine, WindowQuery};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.engine.scrape_interval, Duration::from_secs(15));
    assert_eq!(config.engine.default_window, Duration::from_secs(300));
    assert_eq!(config.concentrator.ring_capacity, 60);
    assert_eq!(config.filter.admin_ports, vec![4191, 9990, 9901]);
    assert!(config.filter.denied_namespaces.contains(&"kube-system".to_string()));
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .scrape_interval(Duration::from_secs(10))
        .default_window(Duration::from_secs(600))
        .ring_capacity(30)
        .denied_namespaces(["monitoring"])
        .log_level(LogLevel::Warn)
        .debug(true)
        .build()
        .unwrap();

    assert_eq!(config.engine.scrape_interval, Duration::from_secs(10));
    assert_eq!(config.concentrator.ring_capacity, 30);
    assert_eq!(config.filter.denied_namespaces, vec!["monitoring".to_string()]);
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert!(config.debug);

    let query = WindowQuery::from_config(&config.engine);
    assert_eq!(query.window_secs(), 600.0);
}

#[test]
fn test_config_validation() {
    assert!(Config::default().validate().is_ok());
    assert!(ConfigBuilder::new().ring_capacity(0).build().is_err());
    assert!(ConfigBuilder::new().default_window(Duration::ZERO).build().is_err());

    let mut config = Config::default();
    config.filter.admin_ports.push(0);
    assert!(config.validate().is_err());
    assert!(TelemetryEngine::from_config(&config).is_err());
}

#[test]
fn test_malformed_yaml_is_a_config_error() {
    let err = ConfigBuilder::new().from_yaml("engine: [not, a, map]").err().unwrap();
    assert!(matches!(err, KubepulseError::Yaml(_)));
    assert_eq!(err.category(), "config");
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_load_config_from_file_with_cli_override() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "engine:\n  scrape_interval: 20s\nconcentrator:\n  ring_capacity: 90\nlogging:\n  level: warn"
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let cli = Cli::try_parse_from(["kubepulse", "--config", &path, "replay", "a.prom", "--interval", "5"])
        .unwrap();
    let config = cli.load_config().await.unwrap();

    // CLI flag beats the file
    assert_eq!(config.engine.scrape_interval, Duration::from_secs(5));
    assert_eq!(config.concentrator.ring_capacity, 90);
    assert_eq!(config.logging.level, LogLevel::Warn);
}

#[tokio::test]
async fn test_explicit_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    let cli = Cli::try_parse_from(["kubepulse", "--config", missing.to_str().unwrap(), "--check-config"]).unwrap();
    assert!(cli.load_config().await.is_err());
}
