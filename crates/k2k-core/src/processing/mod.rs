//! Per-record decision pipeline.
//!
//! A payload moves through three stages before it can be forwarded:
//!
//! 1. **Reconcile** - every schema field must be present ([`reconciler`])
//! 2. **Validate** - values must conform to the schema ([`validator`])
//! 3. **Transform** - the configured [`RecordTransform`] runs ([`transformer`])
//!
//! Each stage either hands the record on or yields a [`RecordError`] that
//! decides the dead-letter reason. No stage touches shared state.

pub mod reconciler;
pub mod transformer;
pub mod validator;

pub use transformer::{RecordTransform, TimestampNormalizer, Zone, EPOCH_SENTINEL};

use crate::error::RecordError;
use crate::record::Record;
use crate::schema::Schema;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, warn};

/// What happened to one consumed message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    /// Published to the output topic
    Forwarded,
    /// Published to the dead-letter topic
    DeadLettered(RecordError),
    /// Nothing to route (e.g. a tombstone without payload)
    Skipped(String),
}

impl ProcessingOutcome {
    /// Short label for logs and the `check` command.
    pub fn label(&self) -> &str {
        match self {
            ProcessingOutcome::Forwarded => "forwarded",
            ProcessingOutcome::DeadLettered(reason) => reason.label(),
            ProcessingOutcome::Skipped(_) => "skipped",
        }
    }
}

/// Run a raw payload through every stage.
///
/// `Ok` carries the record ready for forwarding; `Err` names the stage that
/// rejected it. Never panics: a panicking transform is reported as a
/// processing error.
pub fn run_stages(
    payload: &[u8],
    schema: &Schema,
    transform: &dyn RecordTransform,
) -> Result<Record, RecordError> {
    let record = Record::from_payload(payload)?;

    let record = reconciler::reconcile(record, schema).map_err(RecordError::MissingFields)?;

    if let Err(violation) = validator::check(&record, schema) {
        warn!(
            schema = %schema.name(),
            path = %violation.path,
            reason = %violation.message,
            "Schema validation failed"
        );
        return Err(RecordError::Validation(violation.to_string()));
    }

    guarded_transform(record, transform)
}

fn guarded_transform(
    record: Record,
    transform: &dyn RecordTransform,
) -> Result<Record, RecordError> {
    match panic::catch_unwind(AssertUnwindSafe(|| transform.apply(record))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "transform panicked".to_string());
            error!(transform = %transform.name(), error = %message, "Transform panicked");
            Err(RecordError::Processing(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::user_login_schema;
    use serde_json::json;

    const COMPLETE: &[u8] = br#"{"user_id":"123","app_version":"1.0.0","ip":"1.2.3.4","locale":"NE","device_id":"d1","timestamp":1742331926,"device_type":"android"}"#;

    fn normalizer() -> TimestampNormalizer {
        TimestampNormalizer::new("timestamp", Zone::parse(Some("America/Los_Angeles")).unwrap())
    }

    struct Failing;

    impl RecordTransform for Failing {
        fn apply(&self, _record: Record) -> Result<Record, RecordError> {
            Err(RecordError::Processing("enrichment unavailable".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct Panicking;

    impl RecordTransform for Panicking {
        fn apply(&self, _record: Record) -> Result<Record, RecordError> {
            panic!("index out of bounds")
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[test]
    fn test_complete_record_passes_all_stages() {
        let record = run_stages(COMPLETE, &user_login_schema(), &normalizer()).unwrap();
        assert_eq!(record.get("timestamp"), Some(&json!("2025-03-18 14:05:26")));
        assert_eq!(record.get("ip"), Some(&json!("1.2.3.4")));
        assert_eq!(record.len(), 7);
    }

    #[test]
    fn test_unparseable_payload_is_deserialization_error() {
        let err = run_stages(b"not json", &user_login_schema(), &normalizer()).unwrap_err();
        assert_eq!(err.label(), "deserialization error");
    }

    #[test]
    fn test_partial_record_is_missing_fields() {
        let err = run_stages(br#"{"user_id":"123"}"#, &user_login_schema(), &normalizer())
            .unwrap_err();
        assert_eq!(err.label(), "missing required fields");
        assert!(matches!(err, RecordError::MissingFields(ref f) if f.len() == 6));
    }

    #[test]
    fn test_wrong_type_is_validation_failure() {
        let payload = br#"{"user_id":"123","app_version":"1.0.0","ip":"1.2.3.4","locale":"NE","device_id":"d1","timestamp":"yesterday","device_type":"android"}"#;
        let err = run_stages(payload, &user_login_schema(), &normalizer()).unwrap_err();
        assert_eq!(
            err,
            RecordError::Validation("timestamp: expected long, got string".into())
        );
    }

    #[test]
    fn test_transform_error_is_processing_error() {
        let err = run_stages(COMPLETE, &user_login_schema(), &Failing).unwrap_err();
        assert_eq!(err, RecordError::Processing("enrichment unavailable".into()));
    }

    #[test]
    fn test_transform_panic_is_processing_error() {
        let err = run_stages(COMPLETE, &user_login_schema(), &Panicking).unwrap_err();
        assert_eq!(err, RecordError::Processing("index out of bounds".into()));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ProcessingOutcome::Forwarded.label(), "forwarded");
        assert_eq!(
            ProcessingOutcome::DeadLettered(RecordError::Processing("x".into())).label(),
            "processing error"
        );
        assert_eq!(ProcessingOutcome::Skipped("tombstone".into()).label(), "skipped");
    }
}
