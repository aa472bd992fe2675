//! Configuration structures for k2k.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
///
/// Every section is optional; the defaults describe a local development setup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Kafka configuration
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Schema registry configuration
    #[serde(default)]
    pub schema_registry: SchemaRegistryConfig,

    /// Record pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka consumer and producer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: Vec<String>,

    /// Topic to consume raw records from
    #[serde(default = "default_input_topic")]
    pub input_topic: String,

    /// Topic for successfully processed records
    #[serde(default = "default_output_topic")]
    pub output_topic: String,

    /// Dead-letter topic for rejected payloads
    #[serde(default = "default_dlq_topic")]
    pub dlq_topic: String,

    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Bounded wait for a single poll in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Group session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Group heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,

    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Producer delivery timeout in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u32,

    /// Auto offset reset strategy
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            input_topic: default_input_topic(),
            output_topic: default_output_topic(),
            dlq_topic: default_dlq_topic(),
            consumer_group: default_consumer_group(),
            poll_timeout_ms: default_poll_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            message_timeout_ms: default_message_timeout_ms(),
            auto_offset_reset: OffsetReset::default(),
            security: KafkaSecurityConfig::default(),
        }
    }
}

/// Where a consumer group without committed offsets starts.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Replay the topic from the beginning
    #[default]
    Earliest,
    /// Only read messages produced after joining
    Latest,
}

impl OffsetReset {
    /// librdkafka property value.
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Broker authentication, shared by the consumer and both producers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// `security.protocol`, e.g. SASL_SSL
    pub protocol: Option<String>,

    /// `sasl.mechanism`, e.g. SCRAM-SHA-512
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// CA bundle for broker verification
    pub ssl_ca_location: Option<PathBuf>,

    /// Client certificate for mutual TLS
    pub ssl_cert_location: Option<PathBuf>,

    /// Client private key for mutual TLS
    pub ssl_key_location: Option<PathBuf>,
}

/// Schema registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaRegistryConfig {
    /// Registry base URL
    #[serde(default = "default_registry_url")]
    pub url: String,

    /// Subject to resolve; defaults to `<input_topic>-value`
    #[serde(default)]
    pub subject: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_registry_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Local Avro schema file used instead of the registry
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
}

impl Default for SchemaRegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            subject: None,
            request_timeout_seconds: default_registry_timeout_seconds(),
            schema_file: None,
        }
    }
}

impl SchemaRegistryConfig {
    /// Subject name for the given input topic.
    pub fn subject_for(&self, input_topic: &str) -> String {
        self.subject
            .clone()
            .unwrap_or_else(|| format!("{}-value", input_topic))
    }
}

/// Record pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Field holding the epoch timestamp to normalize
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// IANA time zone used for timestamp formatting (process local zone when unset)
    #[serde(default)]
    pub timezone: Option<String>,

    /// Emit a summary log every N forwarded records
    #[serde(default = "default_summary_interval")]
    pub summary_interval: u64,

    /// Sleep with exponential backoff after non-EOF poll errors
    #[serde(default)]
    pub poll_error_backoff: bool,

    /// Upper bound on the shutdown flush in seconds
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timestamp_field: default_timestamp_field(),
            timezone: None,
            summary_interval: default_summary_interval(),
            poll_error_backoff: false,
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Port serving `/metrics`
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Port serving `/health`, `/healthz` and `/readyz`
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
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

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_bootstrap_servers() -> Vec<String> {
    vec!["localhost:29092".to_string()]
}
fn default_input_topic() -> String {
    "user-login".to_string()
}
fn default_output_topic() -> String {
    "user-login-processed".to_string()
}
fn default_dlq_topic() -> String {
    "user-login-dlq".to_string()
}
fn default_consumer_group() -> String {
    "user-login-consumer-group".to_string()
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_session_timeout_ms() -> u32 {
    30000
}
fn default_heartbeat_interval_ms() -> u32 {
    3000
}
fn default_max_poll_interval_ms() -> u32 {
    300000
}
fn default_message_timeout_ms() -> u32 {
    5000
}
fn default_registry_url() -> String {
    "http://localhost:8081".to_string()
}
fn default_registry_timeout_seconds() -> u64 {
    10
}
fn default_timestamp_field() -> String {
    "timestamp".to_string()
}
fn default_summary_interval() -> u64 {
    10
}
fn default_shutdown_timeout_seconds() -> u64 {
    30
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Not validated here: callers apply overrides first and then call
    /// [`Config::validate`].
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        let kafka = &self.kafka;
        let required = [
            (kafka.bootstrap_servers.is_empty(), "At least one bootstrap server required"),
            (kafka.input_topic.is_empty(), "Input topic is required"),
            (kafka.output_topic.is_empty(), "Output topic is required"),
            (kafka.dlq_topic.is_empty(), "Dead-letter topic is required"),
            (kafka.consumer_group.is_empty(), "Consumer group is required"),
            (
                kafka.output_topic == kafka.dlq_topic,
                "Output topic and dead-letter topic must differ",
            ),
            (
                kafka.input_topic == kafka.output_topic || kafka.input_topic == kafka.dlq_topic,
                "Input topic must differ from output and dead-letter topics",
            ),
            (
                self.pipeline.summary_interval == 0,
                "Summary interval must be at least 1",
            ),
            (
                self.schema_registry.schema_file.is_none() && self.schema_registry.url.is_empty(),
                "Schema registry URL or schema file is required",
            ),
        ];

        if let Some((_, message)) = required.iter().find(|(failed, _)| *failed) {
            return Err(crate::Error::Config((*message).to_string()));
        }

        if let Some(tz) = self.pipeline.timezone.as_deref() {
            tz.parse::<chrono_tz::Tz>()
                .map_err(|_| crate::Error::Config(format!("Unknown time zone: {}", tz)))?;
        }

        if kafka.poll_timeout_ms == 0 {
            tracing::warn!("Poll timeout of 0 ms will spin the consumer loop");
        }

        Ok(())
    }
}
