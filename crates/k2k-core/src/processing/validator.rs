//! Structural validation of records against the schema.

use crate::record::{json_kind, Record};
use crate::schema::{FieldDescriptor, FieldType, Schema};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

/// First mismatch found while validating.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Check a record against the schema. Undeclared fields are tolerated.
///
/// Never fails its caller: any mismatch, including types we cannot check,
/// is reported as `false`.
pub fn validate(record: &Record, schema: &Schema) -> bool {
    match check(record, schema) {
        Ok(()) => true,
        Err(violation) => {
            warn!(
                schema = %schema.name(),
                path = %violation.path,
                reason = %violation.message,
                "Schema validation failed"
            );
            false
        }
    }
}

/// Like [`validate`] but returns the first violation.
pub fn check(record: &Record, schema: &Schema) -> Result<(), Violation> {
    check_fields(record.as_map(), schema.fields(), "")
}

fn check_fields(
    object: &Map<String, Value>,
    fields: &[FieldDescriptor],
    prefix: &str,
) -> Result<(), Violation> {
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", prefix, field.name)
        };
        check_value(object.get(&field.name), &field.field_type, &path)?;
    }
    Ok(())
}

fn check_value(value: Option<&Value>, field_type: &FieldType, path: &str) -> Result<(), Violation> {
    let value = match value {
        Some(v) => v,
        None if field_type.is_nullable() => return Ok(()),
        None => return Err(violation(path, "field is missing")),
    };

    let ok = match field_type {
        FieldType::Null => value.is_null(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Int => value
            .as_i64()
            .map_or(false, |n| i32::try_from(n).is_ok()),
        FieldType::Long => value.as_i64().is_some(),
        FieldType::Float | FieldType::Double => value.is_number(),
        FieldType::Bytes | FieldType::String => value.is_string(),
        FieldType::Enum { symbols } => value
            .as_str()
            .map_or(false, |s| symbols.iter().any(|sym| sym == s)),
        FieldType::Fixed { size } => value.as_str().map_or(false, |s| s.chars().count() == *size),
        FieldType::Array(items) => {
            let array = value
                .as_array()
                .ok_or_else(|| mismatch(path, field_type, value))?;
            for (i, item) in array.iter().enumerate() {
                check_value(Some(item), items, &format!("{}[{}]", path, i))?;
            }
            true
        }
        FieldType::Map(values) => {
            let object = value
                .as_object()
                .ok_or_else(|| mismatch(path, field_type, value))?;
            for (key, item) in object {
                check_value(Some(item), values, &format!("{}.{}", path, key))?;
            }
            true
        }
        FieldType::Record(fields) => {
            let object = value
                .as_object()
                .ok_or_else(|| mismatch(path, field_type, value))?;
            check_fields(object, fields, path)?;
            true
        }
        FieldType::Union(branches) => branches
            .iter()
            .any(|branch| check_value(Some(value), branch, path).is_ok()),
        FieldType::Other(name) => {
            return Err(violation(path, &format!("unsupported type \"{}\"", name)))
        }
    };

    if ok {
        Ok(())
    } else {
        Err(mismatch(path, field_type, value))
    }
}

fn mismatch(path: &str, expected: &FieldType, actual: &Value) -> Violation {
    violation(
        path,
        &format!("expected {}, got {}", expected, json_kind(actual)),
    )
}

fn violation(path: &str, message: &str) -> Violation {
    Violation {
        path: path.to_string(),
        message: message.to_string(),
    }
}
