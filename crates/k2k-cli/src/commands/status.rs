//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// The instance is unreachable or reports itself unhealthy.
#[derive(Debug, thiserror::Error)]
#[error("Pipeline unhealthy: {0}")]
pub struct Unhealthy(pub String);

/// Health report served by a running instance.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    pipeline_running: bool,
    #[serde(default)]
    uptime_seconds: u64,
    #[serde(default)]
    components: BTreeMap<String, ComponentStatus>,
}

#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    reason: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str, metrics_url: &str) -> Result<()> {
    let health_url = format!("{}/health", url.trim_end_matches('/'));
    println!("Checking health at {}...\n", health_url);

    let client = reqwest::Client::new();

    let health = match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => {
                    print_health_status(&health, status_code.as_u16());
                    health
                }
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                    return Err(Unhealthy(format!("unreadable health response ({})", status_code)).into());
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the k2k pipeline running?");
            println!("Start it with: k2k run --config <path-to-config>");
            return Err(Unhealthy(format!("{} unreachable", health_url)).into());
        }
    };

    let metrics_url = format!("{}/metrics", metrics_url.trim_end_matches('/'));
    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    if health.status == "unhealthy" {
        return Err(Unhealthy(unhealthy_components(&health)).into());
    }

    Ok(())
}

fn marker(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        marker(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    println!(
        "Pipeline: {} (uptime {}s)",
        if health.pipeline_running { "running" } else { "stopped" },
        health.uptime_seconds
    );
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, status) in &health.components {
            match &status.reason {
                Some(reason) => println!(
                    "  {} {}: {} ({})",
                    marker(&status.status),
                    name,
                    status.status,
                    reason
                ),
                None => println!("  {} {}: {}", marker(&status.status), name, status.status),
            }
        }
    }
}

fn unhealthy_components(health: &HealthResponse) -> String {
    let names: Vec<&str> = health
        .components
        .iter()
        .filter(|(_, status)| status.status == "unhealthy")
        .map(|(name, _)| name.as_str())
        .collect();
    if names.is_empty() {
        "status reported unhealthy".to_string()
    } else {
        names.join(", ")
    }
}

/// Sum of sample values per metric name, labels collapsed.
fn parse_metrics(metrics_text: &str) -> HashMap<String, f64> {
    let mut values: HashMap<String, f64> = HashMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        // Label values may contain spaces; the sample value is the last token.
        let Some((series, value)) = line.trim_end().rsplit_once(' ') else {
            continue;
        };
        let name = series.split('{').next().unwrap_or(series).trim();
        if let Ok(value) = value.parse::<f64>() {
            *values.entry(name.to_string()).or_insert(0.0) += value;
        }
    }

    values
}

fn print_metrics(metrics_text: &str) {
    let values = parse_metrics(metrics_text);

    let rows = [
        ("k2k_messages_consumed_total", "Messages Consumed:"),
        ("k2k_records_forwarded_total", "Forwarded:        "),
        ("k2k_records_dead_lettered_total", "Dead-lettered:    "),
        ("k2k_messages_skipped_total", "Skipped:          "),
        ("k2k_send_failures_total", "Send Failures:    "),
        ("k2k_poll_errors_total", "Poll Errors:      "),
    ];

    let mut printed = false;
    for (name, label) in rows {
        if let Some(v) = values.get(name) {
            println!("{} {}", label, format_number(*v as u64));
            printed = true;
        }
    }

    if !printed {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_health_report() {
        let body = r#"{
            "status": "unhealthy",
            "pipeline_running": true,
            "uptime_seconds": 42,
            "components": {
                "kafka": {"status": "unhealthy", "reason": "broker down"},
                "producer": {"status": "healthy"},
                "schema_registry": {"status": "unknown"}
            }
        }"#;

        let health: HealthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(health.status, "unhealthy");
        assert!(health.pipeline_running);
        assert_eq!(health.uptime_seconds, 42);
        assert_eq!(
            health.components["kafka"].reason.as_deref(),
            Some("broker down")
        );
        assert_eq!(unhealthy_components(&health), "kafka");
    }

    #[test]
    fn test_parse_metrics_sums_labelled_series() {
        let text = "\
# HELP k2k_records_dead_lettered_total Payloads published to the dead-letter topic
# TYPE k2k_records_dead_lettered_total counter
k2k_records_dead_lettered_total{reason=\"missing required fields\"} 3
k2k_records_dead_lettered_total{reason=\"deserialization error\"} 2
k2k_records_forwarded_total 10
";
        let values = parse_metrics(text);
        assert_eq!(values["k2k_records_dead_lettered_total"], 5.0);
        assert_eq!(values["k2k_records_forwarded_total"], 10.0);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(2_000_000), "2.00M");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unhealthy() {
        let err = run("http://127.0.0.1:1", "http://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<Unhealthy>().is_some());
    }
}
