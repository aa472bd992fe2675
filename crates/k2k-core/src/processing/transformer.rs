//! Record transforms.
//!
//! The pipeline runs exactly one [`RecordTransform`]. The shipped transform,
//! [`TimestampNormalizer`], rewrites an epoch-seconds field into a
//! `YYYY-MM-DD HH:MM:SS` string and never fails.

use crate::config::PipelineConfig;
use crate::error::RecordError;
use crate::record::Record;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Local, TimeZone};
use chrono_tz::Tz;
use serde_json::Value;
use std::fmt;
use tracing::{error, warn};

/// Written when the timestamp is absent, malformed or out of range.
pub const EPOCH_SENTINEL: &str = "1970-01-01 00:00:00";

/// Output layout of normalized timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A step applied to every record that passed validation.
pub trait RecordTransform: Send + Sync {
    /// Transform a record. An `Err` dead-letters the original message.
    fn apply(&self, record: Record) -> std::result::Result<Record, RecordError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Zone in which epoch timestamps are rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Zone {
    /// Process-local time zone
    Local,
    /// Fixed IANA zone
    Named(Tz),
}

impl Zone {
    /// Resolve an optional IANA name; `None` means the local zone.
    pub fn parse(name: Option<&str>) -> Result<Self> {
        match name {
            None => Ok(Zone::Local),
            Some(name) => name
                .parse::<Tz>()
                .map(Zone::Named)
                .map_err(|_| Error::Config(format!("Unknown time zone: {}", name))),
        }
    }

    /// Render epoch seconds, or `None` if the instant is not representable.
    pub fn format_epoch(&self, seconds: i64) -> Option<String> {
        let utc = DateTime::from_timestamp(seconds, 0)?;
        match self {
            Zone::Local => render(&utc.with_timezone(&Local)),
            Zone::Named(tz) => render(&utc.with_timezone(tz)),
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Local => write!(f, "local"),
            Zone::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

// Four-digit years only.
fn render<Z: TimeZone>(dt: &DateTime<Z>) -> Option<String>
where
    Z::Offset: fmt::Display,
{
    if !(1..=9999).contains(&dt.year()) {
        return None;
    }
    Some(dt.format(TIMESTAMP_FORMAT).to_string())
}

/// Rewrites an integer epoch timestamp field as a formatted local time.
#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    field: String,
    zone: Zone,
}

impl TimestampNormalizer {
    pub fn new(field: impl Into<String>, zone: Zone) -> Self {
        Self {
            field: field.into(),
            zone,
        }
    }

    /// Build from pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(
            config.timestamp_field.clone(),
            Zone::parse(config.timezone.as_deref())?,
        ))
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// Normalize the timestamp field. Every other field passes through.
    pub fn transform(&self, mut record: Record) -> Record {
        let formatted = match record.get(&self.field) {
            Some(value @ Value::Number(n)) if n.is_i64() || n.is_u64() => {
                match n.as_i64().and_then(|secs| self.zone.format_epoch(secs)) {
                    Some(formatted) => formatted,
                    None => {
                        error!(
                            field = %self.field,
                            value = %value,
                            zone = %self.zone,
                            "Failed to format timestamp"
                        );
                        EPOCH_SENTINEL.to_string()
                    }
                }
            }
            other => {
                warn!(
                    field = %self.field,
                    value = ?other,
                    "Invalid timestamp format"
                );
                EPOCH_SENTINEL.to_string()
            }
        };

        record.insert(self.field.clone(), Value::String(formatted));
        record
    }
}

impl RecordTransform for TimestampNormalizer {
    fn apply(&self, record: Record) -> std::result::Result<Record, RecordError> {
        Ok(self.transform(record))
    }

    fn name(&self) -> &str {
        "timestamp-normalizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn los_angeles() -> TimestampNormalizer {
        TimestampNormalizer::new("timestamp", Zone::parse(Some("America/Los_Angeles")).unwrap())
    }

    fn with_timestamp(value: Value) -> Record {
        let mut record = Record::new();
        record.insert("timestamp", value);
        record
    }

    #[test]
    fn test_epoch_is_formatted_in_zone() {
        let out = los_angeles().transform(with_timestamp(json!(1742331926)));
        assert_eq!(out.get("timestamp"), Some(&json!("2025-03-18 14:05:26")));
    }

    #[test]
    fn test_utc_zone() {
        let normalizer = TimestampNormalizer::new("timestamp", Zone::parse(Some("UTC")).unwrap());
        let out = normalizer.transform(with_timestamp(json!(0)));
        assert_eq!(out.get("timestamp"), Some(&json!("1970-01-01 00:00:00")));

        let out = normalizer.transform(with_timestamp(json!(1742331926)));
        assert_eq!(out.get("timestamp"), Some(&json!("2025-03-18 21:05:26")));
    }

    #[test]
    fn test_invalid_values_use_sentinel() {
        let normalizer = los_angeles();
        for value in [
            json!("invalid"),
            json!(1742331926.5),
            json!(true),
            json!(null),
            json!([1742331926]),
            json!({"seconds": 1}),
        ] {
            let out = normalizer.transform(with_timestamp(value.clone()));
            assert_eq!(
                out.get("timestamp"),
                Some(&json!(EPOCH_SENTINEL)),
                "value {} should fall back",
                value
            );
        }
    }

    #[test]
    fn test_missing_timestamp_is_inserted_as_sentinel() {
        let mut record = Record::new();
        record.insert("user_id", json!("123"));
        let out = los_angeles().transform(record);
        assert_eq!(out.get("timestamp"), Some(&json!(EPOCH_SENTINEL)));
        assert_eq!(out.get("user_id"), Some(&json!("123")));
    }

    #[test]
    fn test_out_of_range_uses_sentinel() {
        let normalizer = los_angeles();
        for value in [json!(i64::MAX), json!(u64::MAX), json!(400_000_000_000i64)] {
            let out = normalizer.transform(with_timestamp(value));
            assert_eq!(out.get("timestamp"), Some(&json!(EPOCH_SENTINEL)));
        }
    }

    #[test]
    fn test_other_fields_untouched() {
        let mut record = with_timestamp(json!(1742331926));
        record.insert("device_type", json!("android"));
        record.insert("count", json!(7));
        let out = los_angeles().transform(record);
        assert_eq!(out.get("device_type"), Some(&json!("android")));
        assert_eq!(out.get("count"), Some(&json!(7)));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_custom_field_name() {
        let normalizer = TimestampNormalizer::new("ts", Zone::parse(Some("UTC")).unwrap());
        let mut record = with_timestamp(json!(5));
        record.insert("ts", json!(60));
        let out = normalizer.transform(record);
        assert_eq!(out.get("ts"), Some(&json!("1970-01-01 00:01:00")));
        assert_eq!(out.get("timestamp"), Some(&json!(5)));
    }

    #[test]
    fn test_local_zone_formats_something() {
        let normalizer = TimestampNormalizer::new("timestamp", Zone::Local);
        let out = normalizer.transform(with_timestamp(json!(1742331926)));
        let formatted = out.get("timestamp").and_then(Value::as_str).unwrap();
        assert_eq!(formatted.len(), EPOCH_SENTINEL.len());
        assert!(formatted.starts_with("2025-03-1"));
    }

    #[test]
    fn test_zone_parse() {
        assert_eq!(Zone::parse(None).unwrap(), Zone::Local);
        assert!(Zone::parse(Some("Nowhere/Special")).is_err());
        assert_eq!(
            Zone::parse(Some("Asia/Kathmandu")).unwrap().to_string(),
            "Asia/Kathmandu"
        );
    }

    #[test]
    fn test_from_config() {
        let config = PipelineConfig {
            timezone: Some("Europe/Berlin".into()),
            ..PipelineConfig::default()
        };
        let normalizer = TimestampNormalizer::from_config(&config).unwrap();
        assert_eq!(normalizer.field(), "timestamp");
        assert_eq!(normalizer.zone(), Zone::Named(chrono_tz::Europe::Berlin));
    }

    #[test]
    fn test_apply_never_fails() {
        let out = los_angeles().apply(with_timestamp(json!("x")));
        assert!(out.is_ok());
    }
}
