//! Structural argument checking for tool calls.
//!
//! A tool's JSON Schema is reduced to `field -> {type, required}` when it is
//! discovered. Validation only looks at presence and JSON type; anything
//! finer (ranges, formats, patterns, nested shapes) is the server's business.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// JSON type a field is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
    /// No `type`, a union, or a type name we do not know. Accepts anything.
    Any,
}

impl FieldType {
    fn from_schema(schema: &Value) -> Self {
        match schema.get("type").and_then(Value::as_str) {
            Some("string") => Self::String,
            Some("number") => Self::Number,
            Some("integer") => Self::Integer,
            Some("boolean") => Self::Boolean,
            Some("object") => Self::Object,
            Some("array") => Self::Array,
            Some("null") => Self::Null,
            _ => Self::Any,
        }
    }

    /// Whether `value` has this JSON type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Null => value.is_null(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON type name of a concrete value.
fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub ty: FieldType,
    pub required: bool,
}

/// The structural view of a tool's `inputSchema`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputSchema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl InputSchema {
    /// Reduce a JSON Schema object to its top-level fields.
    ///
    /// Names listed in `required` without a matching property are kept as
    /// required fields of type [`FieldType::Any`].
    pub fn from_json_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut fields = BTreeMap::new();
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop) in props {
                fields.insert(
                    name.clone(),
                    FieldSpec {
                        ty: FieldType::from_schema(prop),
                        required: required.contains(&name.as_str()),
                    },
                );
            }
        }
        for name in required {
            fields.entry(name.to_string()).or_insert(FieldSpec {
                ty: FieldType::Any,
                required: true,
            });
        }

        Self { fields }
    }

    /// Check `arguments` against the declared fields, collecting every
    /// violation rather than stopping at the first.
    ///
    /// `null` arguments are treated as an empty object. Fields that are not
    /// declared are passed through untouched.
    pub fn validate(&self, tool: &str, arguments: &Value) -> Result<(), SchemaViolations> {
        let empty = serde_json::Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(SchemaViolations {
                    tool: tool.to_string(),
                    violations: vec![SchemaViolation::NotAnObject {
                        actual: value_type(other),
                    }],
                })
            }
        };

        let mut violations = Vec::new();
        for (name, spec) in &self.fields {
            match args.get(name) {
                None if spec.required => violations.push(SchemaViolation::Missing { field: name.clone() }),
                None => {}
                Some(value) if !spec.ty.matches(value) => violations.push(SchemaViolation::TypeMismatch {
                    field: name.clone(),
                    expected: spec.ty,
                    actual: value_type(value),
                }),
                Some(_) => {}
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaViolations {
                tool: tool.to_string(),
                violations,
            })
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Violations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single way the arguments disagree with the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaViolation {
    NotAnObject {
        actual: &'static str,
    },
    Missing {
        field: String,
    },
    TypeMismatch {
        field: String,
        expected: FieldType,
        actual: &'static str,
    },
}

impl SchemaViolation {
    /// The offending field, if the violation is about one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::NotAnObject { .. } => None,
            Self::Missing { field } | Self::TypeMismatch { field, .. } => Some(field),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject { actual } => write!(f, "arguments must be an object, got {actual}"),
            Self::Missing { field } => write!(f, "missing required field `{field}`"),
            Self::TypeMismatch {
                field,
                expected,
                actual,
            } => write!(f, "field `{field}` expected {expected}, got {actual}"),
        }
    }
}

/// Every violation found for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub struct SchemaViolations {
    pub tool: String,
    pub violations: Vec<SchemaViolation>,
}

impl fmt::Display for SchemaViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid arguments for tool `{}`: ", self.tool)?;
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}
