//! The record tree.
//!
//! Records are arbitrary trees of scalars and containers. Dates, regexes,
//! and big integers are opaque leaves: assignment replaces them and no
//! structural recursion happens inside them. Objects and arrays are
//! addressable by dotted paths; sets and maps are mutated only as whole
//! containers.

use crate::error::{Error, Result};
use crate::Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value in a tracked record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Opaque leaf: arbitrary-precision integer.
    BigInt(i128),
    String(String),
    /// Opaque leaf: instant in time.
    Date(DateTime<Utc>),
    /// Opaque leaf: pattern source text.
    Regex(String),
    Array(Vec<Value>),
    /// Insertion-ordered, unique by equality.
    Set(Vec<Value>),
    /// Insertion-ordered association list; keys unique by equality.
    Map(Vec<(Value, Value)>),
    Object(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

/// Equality used for write suppression. NaN compares equal to itself so a
/// repeated float write is still recognized as a no-op.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Name of this value's kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Regex(_) => "regex",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    /// Whether this value is a path-addressable container (object or array).
    pub fn is_addressable(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Object attribute lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Resolve a dotted path from this value. The empty path is this value.
    pub fn at_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path_segments(path) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Mutable path resolution without creating intermediates.
    pub fn at_path_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut current = self;
        for segment in path_segments(path) {
            current = match current {
                Value::Object(map) => map.get_mut(segment)?,
                Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Assign a value at a dotted path, creating intermediate objects for
    /// absent keys. Array segments pad with nulls when the index is past the
    /// end. Traversing through a non-container value fails.
    pub fn set_at_path(&mut self, path: &str, value: Value) -> Result<()> {
        if path.is_empty() {
            *self = value;
            return Ok(());
        }
        let (parent_path, leaf) = split_leaf(path);
        let parent = self.ensure_path(parent_path, path)?;
        match parent {
            Value::Object(map) => {
                map.insert(leaf.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let index = parse_index(leaf).ok_or_else(|| Error::WrongValueKind {
                    path: path.to_string(),
                    expected: "array index",
                })?;
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                items[index] = value;
                Ok(())
            }
            other => Err(Error::WrongValueKind {
                path: parent_path.to_string(),
                expected: container_expectation(other),
            }),
        }
    }

    /// Delete the attribute at a dotted path. Absent paths are a no-op.
    /// Array slots are cleared to null rather than shifted, so sibling
    /// indices stay stable.
    pub fn remove_at_path(&mut self, path: &str) -> Option<Value> {
        if path.is_empty() {
            return None;
        }
        let (parent_path, leaf) = split_leaf(path);
        match self.at_path_mut(parent_path)? {
            Value::Object(map) => map.remove(leaf),
            Value::Array(items) => {
                let index = parse_index(leaf)?;
                let slot = items.get_mut(index)?;
                Some(std::mem::replace(slot, Value::Null))
            }
            _ => None,
        }
    }

    /// Walk to `path`, materializing absent object keys along the way.
    /// `full_path` is only used for error reporting.
    fn ensure_path(&mut self, path: &str, full_path: &str) -> Result<&mut Value> {
        let mut current = self;
        for segment in path_segments(path) {
            current = match current {
                Value::Object(map) => map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(BTreeMap::new())),
                Value::Array(items) => {
                    let index = parse_index(segment).ok_or_else(|| Error::WrongValueKind {
                        path: full_path.to_string(),
                        expected: "array index",
                    })?;
                    if index >= items.len() {
                        items.resize(index + 1, Value::Null);
                    }
                    &mut items[index]
                }
                other => {
                    return Err(Error::WrongValueKind {
                        path: full_path.to_string(),
                        expected: container_expectation(other),
                    })
                }
            };
            // An absent key materialized as null becomes an object so the
            // walk can continue.
            if current.is_null() {
                *current = Value::Object(BTreeMap::new());
            }
        }
        Ok(current)
    }
}

fn container_expectation(found: &Value) -> &'static str {
    match found {
        Value::Date(_) | Value::Regex(_) | Value::BigInt(_) => "a container (found an opaque leaf)",
        _ => "a container",
    }
}

/// Split a dotted path into segments; the empty path has none.
pub(crate) fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|segment| !segment.is_empty())
}

/// Join a parent path and one more segment.
pub(crate) fn join_path(base: &str, segment: &str) -> Path {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}.{segment}")
    }
}

/// Split off the last segment: `"a.b.c"` -> `("a.b", "c")`, `"a"` -> `("", "a")`.
pub(crate) fn split_leaf(path: &str) -> (&str, &str) {
    match path.rsplit_once('.') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", path),
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    segment.parse::<usize>().ok()
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i128> for Value {
    fn from(value: i128) -> Self {
        Value::BigInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Object(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::BigInt(u as i128)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Lossy downstream conversion: opaque leaves degrade to their textual or
/// numeric form, sets to arrays, maps to arrays of pairs.
impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(n) => serde_json::Value::from(n),
            Value::Float(f) => {
                serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::BigInt(n) => {
                if let Ok(fits) = i64::try_from(n) {
                    serde_json::Value::from(fits)
                } else {
                    serde_json::Value::String(n.to_string())
                }
            }
            Value::String(s) => serde_json::Value::String(s),
            Value::Date(d) => serde_json::Value::String(d.to_rfc3339()),
            Value::Regex(source) => serde_json::Value::String(source),
            Value::Array(items) | Value::Set(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(entries) => serde_json::Value::Array(
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        serde_json::Value::Array(vec![
                            serde_json::Value::from(k),
                            serde_json::Value::from(v),
                        ])
                    })
                    .collect(),
            ),
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, serde_json::Value::from(value)))
                    .collect(),
            ),
        }
    }
}
