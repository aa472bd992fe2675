//! Check command implementation.
//!
//! Runs a single payload through reconcile, validate and transform exactly
//! as the pipeline would, and reports which topic it would land on.

use anyhow::Result;
use k2k_core::processing::{run_stages, TimestampNormalizer};
use k2k_core::schema::{provider_from_config, FileSchemaProvider, SchemaProvider};
use k2k_core::{Config, Record, RecordError};
use serde_json::{json, Value};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// The payload would have been dead-lettered.
#[derive(Debug, thiserror::Error)]
#[error("Payload rejected: {reason}")]
pub struct Rejected {
    pub reason: String,
}

/// Check one payload read from `input`, or stdin when absent.
pub async fn run(config: &Config, input: Option<&Path>, schema_file: Option<&Path>) -> Result<()> {
    let provider: Box<dyn SchemaProvider> = match schema_file {
        Some(path) => Box::new(FileSchemaProvider::new(path.to_path_buf())),
        None => provider_from_config(config)?,
    };
    let subject = config
        .schema_registry
        .subject_for(&config.kafka.input_topic);
    let schema = provider.latest_schema(&subject).await?;

    let payload = match input {
        Some(path) => tokio::fs::read(path).await?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            buf
        }
    };

    let transform = TimestampNormalizer::from_config(&config.pipeline)?;
    let result = run_stages(&payload, &schema, &transform);

    let report = render(config, &result);
    println!("{}", serde_json::to_string_pretty(&report)?);

    match result {
        Ok(_) => Ok(()),
        Err(reason) => Err(Rejected {
            reason: reason.to_string(),
        }
        .into()),
    }
}

fn render(config: &Config, result: &std::result::Result<Record, RecordError>) -> Value {
    match result {
        Ok(record) => json!({
            "outcome": "forwarded",
            "topic": config.kafka.output_topic,
            "record": Value::Object(record.as_map().clone()),
        }),
        Err(reason) => json!({
            "outcome": "dead-lettered",
            "topic": config.kafka.dlq_topic,
            "reason": reason.label(),
            "detail": reason.detail(),
        }),
    }
}
