//! Schema validation.
//!
//! The engine consumes validation as a capability: anything implementing
//! [`Validator`] can be attached to a collection. Validation runs
//! synchronously on insert and update; a failure carries the full list of
//! issues and leaves the collection untouched.
//!
//! [`RecordSchema`] is the built-in field-based implementation.

use crate::value::Value;
use crate::Path;
use serde::{Deserialize, Serialize};

/// One validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
}

impl Issue {
    pub fn new(message: impl Into<String>, path: Option<Path>) -> Self {
        Self {
            message: message.into(),
            path,
        }
    }
}

/// The validation capability consumed by collections.
///
/// On success the validator returns the value to store, which allows
/// implementations to coerce or fill in defaults. On failure it returns
/// every issue found, not just the first.
pub trait Validator {
    fn validate(&self, value: &Value) -> std::result::Result<Value, Vec<Issue>>;
}

/// Kinds a field can be constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    Date,
    BigInt,
    Array,
    Set,
    Map,
    Object,
    /// Any value passes.
    Any,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Date => "date",
            FieldKind::BigInt => "bigint",
            FieldKind::Array => "array",
            FieldKind::Set => "set",
            FieldKind::Map => "map",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        };
        write!(f, "{name}")
    }
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => matches!(value, Value::String(_)),
            FieldKind::Int => matches!(value, Value::Int(_)),
            FieldKind::Float => matches!(value, Value::Float(_) | Value::Int(_)),
            FieldKind::Bool => matches!(value, Value::Bool(_)),
            FieldKind::Date => matches!(value, Value::Date(_)),
            FieldKind::BigInt => matches!(value, Value::BigInt(_) | Value::Int(_)),
            FieldKind::Array => matches!(value, Value::Array(_)),
            FieldKind::Set => matches!(value, Value::Set(_)),
            FieldKind::Map => matches!(value, Value::Map(_)),
            FieldKind::Object => matches!(value, Value::Object(_)),
            FieldKind::Any => true,
        }
    }
}

/// Definition of one top-level field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldDef {
    /// A field that must be present and non-null.
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    /// A field that may be absent or null.
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    fn check(&self, value: Option<&Value>, issues: &mut Vec<Issue>) {
        match value {
            None | Some(Value::Null) => {
                if self.required {
                    issues.push(Issue::new(
                        format!("missing required field '{}'", self.name),
                        Some(self.name.clone()),
                    ));
                }
            }
            Some(present) => {
                if !self.kind.matches(present) {
                    issues.push(Issue::new(
                        format!(
                            "field '{}' expects {}, got {}",
                            self.name,
                            self.kind,
                            present.kind_name()
                        ),
                        Some(self.name.clone()),
                    ));
                }
            }
        }
    }
}

/// Field-based record validator. Unknown fields pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSchema {
    pub fields: Vec<FieldDef>,
}

impl RecordSchema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// Builder-style field addition.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }
}

impl Validator for RecordSchema {
    fn validate(&self, value: &Value) -> std::result::Result<Value, Vec<Issue>> {
        let object = match value.as_object() {
            Some(object) => object,
            None => {
                return Err(vec![Issue::new("record must be an object", None)]);
            }
        };

        let mut issues = Vec::new();
        for field in &self.fields {
            field.check(object.get(&field.name), &mut issues);
        }

        if issues.is_empty() {
            Ok(value.clone())
        } else {
            Err(issues)
        }
    }
}
