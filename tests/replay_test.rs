//! Replaying exposition dumps through the CLI driver.

use chrono::{TimeZone, Utc};
use kubepulse_lib::cli::replay;
use kubepulse_lib::core::ConfigBuilder;
use kubepulse_lib::metrics::AggregatedMetric;
use std::path::PathBuf;
use std::time::Duration;

fn write_scrape(dir: &tempfile::TempDir, name: &str, requests: u32, cpu_idle: u32) -> PathBuf {
    let path = dir.path().join(name);
    let text = format!(
        "# TYPE response_total counter\n\
         response_total{{direction=\"inbound\",namespace=\"shop\",pod=\"web-a\",deployment=\"web\",status_code=\"200\",classification=\"success\",tls=\"true\"}} {requests}\n\
         # TYPE node_cpu_seconds_total counter\n\
         node_cpu_seconds_total{{cpu=\"0\",mode=\"idle\"}} {cpu_idle}\n\
         node_cpu_seconds_total{{cpu=\"0\",mode=\"user\"}} {cpu_idle}\n\
         # TYPE node_memory_MemTotal_bytes gauge\n\
         node_memory_MemTotal_bytes 1000\n\
         # TYPE node_memory_MemAvailable_bytes gauge\n\
         node_memory_MemAvailable_bytes 250\n\
         garbage line here\n"
    );
    std::fs::write(&path, text).unwrap();
    path
}

#[tokio::test]
async fn test_replay_produces_aggregates_and_series() {
    let dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_scrape(&dir, "1.prom", 100, 10),
        write_scrape(&dir, "2.prom", 400, 20),
        write_scrape(&dir, "3.prom", 1000, 30),
    ];
    let config = ConfigBuilder::new()
        .scrape_interval(Duration::from_secs(30))
        .build()
        .unwrap();
    let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 45).unwrap();

    let report = replay(&config, &files, Some("node-a"), end).await.unwrap();

    assert_eq!(report.cycles.len(), 3);
    assert!(report.cycles.iter().all(|c| c.skipped_lines == 1));
    assert_eq!(report.cycles[2].collected_at, end);
    assert_eq!(report.cycles[0].stats.aggregates, 0);

    match report.aggregates.as_slice() {
        [AggregatedMetric::Service(slo)] => {
            assert_eq!(slo.requests, 600.0);
            assert_eq!(slo.rps, 20.0);
        }
        other => panic!("unexpected aggregates: {:?}", other),
    }

    assert_eq!(report.nodes.len(), 1);
    assert_eq!(report.nodes[0].node, "node-a");
    assert_eq!(report.nodes[0].cpu_percent, 50.0);
    assert_eq!(report.nodes[0].memory_percent, 75.0);

    // scrapes at 11:59:45, 12:00:15 and 12:00:45 span two minutes
    assert_eq!(report.node_series[0].points.len(), 2);
    assert_eq!(report.slo_series[0].points.len(), 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["aggregates"][0]["kind"], "service");
}

#[tokio::test]
async fn test_replay_missing_file_is_an_error() {
    let config = ConfigBuilder::new().build().unwrap();
    let result = replay(&config, &[PathBuf::from("/nonexistent/scrape.prom")], None, Utc::now()).await;
    assert!(result.is_err());
}
