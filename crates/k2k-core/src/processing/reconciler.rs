//! Schema-driven field completion.

use crate::record::Record;
use crate::schema::{FieldType, Schema};
use serde_json::Value;
use tracing::warn;

/// Default inserted for a missing field, if its type has one.
///
/// Only `string`, `int`/`long` and `boolean` have a default. Any other type
/// stays unfilled.
pub fn default_for(field_type: &FieldType) -> Option<Value> {
    match field_type {
        FieldType::String => Some(Value::String(String::new())),
        FieldType::Int | FieldType::Long => Some(Value::from(0)),
        FieldType::Boolean => Some(Value::Bool(false)),
        _ => None,
    }
}

/// Insert defaults for absent schema fields and return the names that were absent.
pub fn fill_missing(record: &mut Record, schema: &Schema) -> Vec<String> {
    let mut missing = Vec::new();

    for field in schema.fields() {
        if record.contains(&field.name) {
            continue;
        }

        warn!(field = %field.name, "Missing field");
        missing.push(field.name.clone());

        match default_for(&field.field_type) {
            Some(value) => {
                record.insert(field.name.clone(), value);
            }
            None => {
                warn!(
                    field = %field.name,
                    field_type = %field.field_type,
                    "No default for field type"
                );
            }
        }
    }

    missing
}

/// Complete a record against the schema.
///
/// Returns the record unchanged when every schema field is present. If any
/// field was absent the record is rejected with the list of absent names,
/// even though defaults were filled in on the way.
pub fn reconcile(mut record: Record, schema: &Schema) -> Result<Record, Vec<String>> {
    let missing = fill_missing(&mut record, schema);
    if missing.is_empty() {
        Ok(record)
    } else {
        Err(missing)
    }
}
