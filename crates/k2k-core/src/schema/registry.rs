//! Schema providers: Confluent-compatible registry client and local file.

use super::Schema;
use crate::config::Config;
use crate::{Error, Result, SchemaError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Source of the record schema, queried once at startup.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Fetch the latest schema registered for `subject`.
    async fn latest_schema(&self, subject: &str) -> Result<Schema>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// Build the provider selected by configuration.
///
/// A configured `schema_file` takes precedence over the registry URL.
pub fn provider_from_config(config: &Config) -> Result<Box<dyn SchemaProvider>> {
    match config.schema_registry.schema_file {
        Some(ref path) => Ok(Box::new(FileSchemaProvider::new(path.clone()))),
        None => Ok(Box::new(SchemaRegistryClient::new(
            &config.schema_registry.url,
            Duration::from_secs(config.schema_registry.request_timeout_seconds),
        )?)),
    }
}

/// Response body of `GET /subjects/{subject}/versions/{version}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredSchema {
    pub subject: String,
    pub version: i32,
    pub id: i32,
    /// Schema document as an embedded JSON string
    pub schema: String,
    /// Absent for Avro, which is the registry default
    #[serde(rename = "schemaType", default)]
    pub schema_type: Option<String>,
}

/// HTTP client for a Confluent-compatible schema registry.
pub struct SchemaRegistryClient {
    client: Client,
    base_url: Url,
}

impl SchemaRegistryClient {
    /// Create a new registry client.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = Url::parse(base_url).map_err(|e| {
            Error::Config(format!("Invalid schema registry URL '{}': {}", base_url, e))
        })?;

        Ok(Self { client, base_url })
    }

    /// `{base}/subjects/{subject}/versions/latest`, with the subject percent-encoded.
    pub fn latest_version_url(&self, subject: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SchemaError::Registry {
                url: self.base_url.to_string(),
                message: "URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(["subjects", subject, "versions", "latest"]);
        Ok(url)
    }

    /// Fetch the raw latest registration for a subject.
    pub async fn latest_version(&self, subject: &str) -> Result<RegisteredSchema> {
        let url = self.latest_version_url(subject)?;
        debug!(url = %url, "Fetching latest schema version");

        let response = self
            .client
            .get(url.clone())
            .header("Accept", "application/vnd.schemaregistry.v1+json")
            .send()
            .await
            .map_err(|e| SchemaError::Registry {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => {
                response
                    .json::<RegisteredSchema>()
                    .await
                    .map_err(|e| {
                        Error::Schema(SchemaError::Registry {
                            url: url.to_string(),
                            message: format!("Failed to parse response: {}", e),
                        })
                    })
            }
            StatusCode::NOT_FOUND => Err(SchemaError::SubjectNotFound(subject.to_string()).into()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SchemaError::Registry {
                    url: url.to_string(),
                    message: format!("HTTP {}: {}", status, body),
                }
                .into())
            }
        }
    }
}

#[async_trait]
impl SchemaProvider for SchemaRegistryClient {
    async fn latest_schema(&self, subject: &str) -> Result<Schema> {
        let registered = self.latest_version(subject).await?;

        if let Some(ref kind) = registered.schema_type {
            if !kind.eq_ignore_ascii_case("AVRO") {
                return Err(SchemaError::Invalid(format!(
                    "subject {} holds a {} schema, expected AVRO",
                    subject, kind
                ))
                .into());
            }
        }

        let schema = Schema::from_json_str(&registered.schema)?;

        info!(
            subject = %registered.subject,
            version = registered.version,
            id = registered.id,
            fields = schema.len(),
            "Fetched schema"
        );

        Ok(schema)
    }

    fn location(&self) -> String {
        self.base_url.as_str().trim_end_matches('/').to_string()
    }
}

/// Reads the schema from a local Avro schema file.
pub struct FileSchemaProvider {
    path: PathBuf,
}

impl FileSchemaProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SchemaProvider for FileSchemaProvider {
    async fn latest_schema(&self, subject: &str) -> Result<Schema> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let schema = Schema::from_json_str(&text)?;

        info!(
            subject = %subject,
            path = %self.path.display(),
            fields = schema.len(),
            "Loaded schema from file"
        );

        Ok(schema)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
