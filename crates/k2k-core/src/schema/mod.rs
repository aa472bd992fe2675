//! Record schema model.
//!
//! Schemas arrive as Avro record documents (from the registry or a local file)
//! and are parsed once into an immutable field list shared by the pipeline.

mod registry;

pub use registry::{
    provider_from_config, FileSchemaProvider, RegisteredSchema, SchemaProvider, SchemaRegistryClient,
};

use crate::error::SchemaError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Declared type of a schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Enum { symbols: Vec<String> },
    Fixed { size: usize },
    Array(Box<FieldType>),
    Map(Box<FieldType>),
    Record(Vec<FieldDescriptor>),
    Union(Vec<FieldType>),
    /// Reference to a name not defined earlier in the same document
    Other(String),
}

impl FieldType {
    fn primitive(name: &str) -> Option<Self> {
        let primitive = match name {
            "null" => FieldType::Null,
            "boolean" => FieldType::Boolean,
            "int" => FieldType::Int,
            "long" => FieldType::Long,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "bytes" => FieldType::Bytes,
            "string" => FieldType::String,
            _ => return None,
        };
        Some(primitive)
    }

    /// Whether a JSON null is an acceptable value.
    pub fn is_nullable(&self) -> bool {
        match self {
            FieldType::Null => true,
            FieldType::Union(branches) => branches.iter().any(FieldType::is_nullable),
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Null => write!(f, "null"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Int => write!(f, "int"),
            FieldType::Long => write!(f, "long"),
            FieldType::Float => write!(f, "float"),
            FieldType::Double => write!(f, "double"),
            FieldType::Bytes => write!(f, "bytes"),
            FieldType::String => write!(f, "string"),
            FieldType::Enum { .. } => write!(f, "enum"),
            FieldType::Fixed { size } => write!(f, "fixed({})", size),
            FieldType::Array(items) => write!(f, "array<{}>", items),
            FieldType::Map(values) => write!(f, "map<{}>", values),
            FieldType::Record(_) => write!(f, "record"),
            FieldType::Union(branches) => {
                let names: Vec<String> = branches.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", names.join(", "))
            }
            FieldType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A single named field of a record schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Top-level record schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Parse an Avro record schema from its JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| SchemaError::Invalid(format!("schema is not JSON: {}", e)))?;
        Self::from_value(&value)
    }

    /// Parse an Avro record schema document.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SchemaError::Invalid("schema must be a JSON object".into()))?;

        match obj.get("type").and_then(Value::as_str) {
            Some("record") => {}
            Some(other) => {
                return Err(SchemaError::Invalid(format!(
                    "expected a record schema, found \"{}\"",
                    other
                )))
            }
            None => return Err(SchemaError::Invalid("schema has no \"type\"".into())),
        }

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("record")
            .to_string();
        let fullname = qualify(&name, obj.get("namespace").and_then(Value::as_str));

        let fields = obj
            .get("fields")
            .ok_or_else(|| SchemaError::Invalid("record schema has no fields".into()))?;

        let fields = NamedTypes::default().parse_fields(fields, namespace_of(&fullname))?;
        Ok(Self { name, fields })
    }

    /// Record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Records, enums and fixed types defined so far in one schema document,
/// keyed by fullname and by short name.
#[derive(Default)]
struct NamedTypes {
    defined: HashMap<String, FieldType>,
}

impl NamedTypes {
    fn parse(&mut self, value: &Value, namespace: Option<&str>) -> Result<FieldType, SchemaError> {
        match value {
            Value::String(name) => Ok(self.resolve(name, namespace)),
            Value::Array(branches) => branches
                .iter()
                .map(|branch| self.parse(branch, namespace))
                .collect::<Result<Vec<_>, _>>()
                .map(FieldType::Union),
            Value::Object(obj) => {
                let type_name = obj
                    .get("type")
                    .ok_or_else(|| SchemaError::Invalid("type object without \"type\"".into()))?;

                // {"type": {"type": ...}} and {"type": [..]} nest the real type
                let type_name = match type_name {
                    Value::String(name) => name.as_str(),
                    other => return self.parse(other, namespace),
                };

                match type_name {
                    "record" | "enum" | "fixed" => self.define(type_name, obj, namespace),
                    "array" => {
                        let items = obj
                            .get("items")
                            .ok_or_else(|| SchemaError::Invalid("array without items".into()))?;
                        Ok(FieldType::Array(Box::new(self.parse(items, namespace)?)))
                    }
                    "map" => {
                        let values = obj
                            .get("values")
                            .ok_or_else(|| SchemaError::Invalid("map without values".into()))?;
                        Ok(FieldType::Map(Box::new(self.parse(values, namespace)?)))
                    }
                    // Primitives with attributes, e.g. logicalType annotations
                    other => Ok(self.resolve(other, namespace)),
                }
            }
            other => Err(SchemaError::Invalid(format!(
                "unsupported type expression: {}",
                other
            ))),
        }
    }

    fn define(
        &mut self,
        kind: &str,
        obj: &Map<String, Value>,
        namespace: Option<&str>,
    ) -> Result<FieldType, SchemaError> {
        let fullname = obj.get("name").and_then(Value::as_str).map(|name| {
            qualify(name, obj.get("namespace").and_then(Value::as_str).or(namespace))
        });

        let field_type = match kind {
            "record" => {
                let fields = obj
                    .get("fields")
                    .ok_or_else(|| SchemaError::Invalid("nested record without fields".into()))?;
                let inner = fullname.as_deref().and_then(namespace_of);
                FieldType::Record(self.parse_fields(fields, inner)?)
            }
            "enum" => {
                let symbols = obj
                    .get("symbols")
                    .and_then(Value::as_array)
                    .ok_or_else(|| SchemaError::Invalid("enum without symbols".into()))?
                    .iter()
                    .map(|s| {
                        s.as_str().map(String::from).ok_or_else(|| {
                            SchemaError::Invalid("enum symbol is not a string".into())
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                FieldType::Enum { symbols }
            }
            _ => {
                let size = obj
                    .get("size")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| SchemaError::Invalid("fixed without size".into()))?;
                FieldType::Fixed {
                    size: size as usize,
                }
            }
        };

        if let Some(fullname) = fullname {
            let short = fullname.rsplit('.').next().unwrap_or(&fullname).to_string();
            self.defined
                .entry(short)
                .or_insert_with(|| field_type.clone());
            self.defined.insert(fullname, field_type.clone());
        }

        Ok(field_type)
    }

    fn resolve(&self, name: &str, namespace: Option<&str>) -> FieldType {
        if let Some(primitive) = FieldType::primitive(name) {
            return primitive;
        }
        self.defined
            .get(&qualify(name, namespace))
            .or_else(|| self.defined.get(name))
            .cloned()
            .unwrap_or_else(|| FieldType::Other(name.to_string()))
    }

    fn parse_fields(
        &mut self,
        value: &Value,
        namespace: Option<&str>,
    ) -> Result<Vec<FieldDescriptor>, SchemaError> {
        let fields = value
            .as_array()
            .ok_or_else(|| SchemaError::Invalid("\"fields\" must be an array".into()))?;

        let mut parsed = Vec::with_capacity(fields.len());
        for field in fields {
            let name = field
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::Invalid("field without a name".into()))?;
            let field_type = field
                .get("type")
                .ok_or_else(|| SchemaError::Invalid(format!("field \"{}\" has no type", name)))?;

            if parsed.iter().any(|f: &FieldDescriptor| f.name == name) {
                return Err(SchemaError::Invalid(format!("duplicate field \"{}\"", name)));
            }

            parsed.push(FieldDescriptor::new(name, self.parse(field_type, namespace)?));
        }

        Ok(parsed)
    }
}

/// Fullname of `name` within `namespace`. Dotted names are already full.
fn qualify(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() && !name.contains('.') => format!("{}.{}", ns, name),
        _ => name.to_string(),
    }
}

fn namespace_of(fullname: &str) -> Option<&str> {
    fullname.rsplit_once('.').map(|(namespace, _)| namespace)
}
