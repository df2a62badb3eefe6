//! The delta algebra.
//!
//! A delta is a normalized mapping from operation tag to a map of
//! path -> argument. Deltas are produced by the mutation tracker, merged
//! per tag (source wins on path collision), and applied in a fixed tag
//! order. Per-path order within a tag is not part of the contract.

use crate::error::{Error, Result};
use crate::value::Value;
use crate::Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which end `$pop` removes from: `Last` is the original's `1`,
/// `First` its `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopEnd {
    Last,
    First,
}

/// Arguments of a `$splice` entry: an in-place sequence edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Splice {
    pub start: usize,
    pub delete_count: usize,
    pub items: Vec<Value>,
}

impl Splice {
    pub fn new(start: usize, delete_count: usize, items: Vec<Value>) -> Self {
        Self {
            start,
            delete_count,
            items,
        }
    }
}

/// A path-addressed change set over a record.
///
/// All nine tags are always present in memory; empty tags are omitted when
/// serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(rename = "$set", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<Path, Value>,

    #[serde(rename = "$unset", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unset: BTreeMap<Path, bool>,

    #[serde(rename = "$push", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub push: BTreeMap<Path, Value>,

    #[serde(rename = "$append", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub append: BTreeMap<Path, Vec<Value>>,

    #[serde(rename = "$prepend", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prepend: BTreeMap<Path, Vec<Value>>,

    #[serde(rename = "$pop", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pop: BTreeMap<Path, PopEnd>,

    #[serde(rename = "$pull", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pull: BTreeMap<Path, Value>,

    #[serde(rename = "$splice", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub splice: BTreeMap<Path, Splice>,

    #[serde(
        rename = "$addToSet",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub add_to_set: BTreeMap<Path, Value>,
}

impl Delta {
    /// A delta with every tag empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff every tag's map is empty.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.push.is_empty()
            && self.append.is_empty()
            && self.prepend.is_empty()
            && self.pop.is_empty()
            && self.pull.is_empty()
            && self.splice.is_empty()
            && self.add_to_set.is_empty()
    }

    /// Union another delta into this one, per tag. On a path collision
    /// within a tag the source entry wins. No cross-tag collapsing is
    /// attempted.
    pub fn merge(&mut self, source: Delta) {
        self.set.extend(source.set);
        self.unset.extend(source.unset);
        self.push.extend(source.push);
        self.append.extend(source.append);
        self.prepend.extend(source.prepend);
        self.pop.extend(source.pop);
        self.pull.extend(source.pull);
        self.splice.extend(source.splice);
        self.add_to_set.extend(source.add_to_set);
    }

    /// Execute this delta against a value, tag by tag in the fixed order
    /// `$set`, `$unset`, `$push`, `$append`, `$prepend`, `$pop`, `$splice`,
    /// then the reserved `$pull` and `$addToSet`.
    ///
    /// `$set` creates intermediate objects for absent keys; `$unset` on an
    /// absent path is a no-op; `$pop` on a missing or empty sequence is a
    /// no-op. The sequence tags operate on the container at the path, not
    /// on an element of it.
    pub fn apply(&self, value: &mut Value) -> Result<()> {
        for (path, entry) in &self.set {
            value.set_at_path(path, entry.clone())?;
        }
        for path in self.unset.keys() {
            value.remove_at_path(path);
        }
        for (path, entry) in &self.push {
            sequence_at(value, path)?.push(entry.clone());
        }
        for (path, entries) in &self.append {
            sequence_at(value, path)?.extend(entries.iter().cloned());
        }
        for (path, entries) in &self.prepend {
            let items = sequence_at(value, path)?;
            let _ = items.splice(0..0, entries.iter().cloned());
        }
        for (path, end) in &self.pop {
            if let Some(Value::Array(items)) = value.at_path_mut(path) {
                if !items.is_empty() {
                    match end {
                        PopEnd::Last => {
                            items.pop();
                        }
                        PopEnd::First => {
                            items.remove(0);
                        }
                    }
                }
            }
        }
        for (path, splice) in &self.splice {
            let items = sequence_at(value, path)?;
            let start = splice.start.min(items.len());
            let end = (start + splice.delete_count).min(items.len());
            let _ = items.splice(start..end, splice.items.iter().cloned());
        }
        for (path, entry) in &self.pull {
            if let Some(items) = mutable_elements(value, path) {
                if let Some(position) = items.iter().position(|existing| existing == entry) {
                    items.remove(position);
                }
            }
        }
        for (path, entry) in &self.add_to_set {
            let items = elements_or_init(value, path)?;
            if !items.contains(entry) {
                items.push(entry.clone());
            }
        }
        Ok(())
    }

    /// Drop every entry, in every tag, at `path` or below it.
    pub(crate) fn purge_at_and_below(&mut self, path: &str) {
        let keep = |entry_path: &str| !covers(path, entry_path);
        self.set.retain(|p, _| keep(p));
        self.unset.retain(|p, _| keep(p));
        self.push.retain(|p, _| keep(p));
        self.append.retain(|p, _| keep(p));
        self.prepend.retain(|p, _| keep(p));
        self.pop.retain(|p, _| keep(p));
        self.pull.retain(|p, _| keep(p));
        self.splice.retain(|p, _| keep(p));
        self.add_to_set.retain(|p, _| keep(p));
    }

    /// Whether any tag whose replay does not commute with edits below it
    /// has an entry at exactly `path`. Used by the tracker to decide when
    /// a recording must collapse to a whole-container `$set`.
    pub(crate) fn reorders_sequence_at(&self, path: &str) -> bool {
        self.pop.contains_key(path) || self.splice.contains_key(path)
    }

    /// The outermost proper ancestor of `path` carrying an entry that
    /// rewrites or re-indexes its subtree (`$unset` or any sequence tag).
    pub(crate) fn rewriting_ancestor(&self, path: &str) -> Option<Path> {
        for ancestor in proper_ancestors(path) {
            if self.unset.contains_key(ancestor)
                || self.push.contains_key(ancestor)
                || self.append.contains_key(ancestor)
                || self.prepend.contains_key(ancestor)
                || self.pop.contains_key(ancestor)
                || self.splice.contains_key(ancestor)
            {
                return Some(ancestor.to_string());
            }
        }
        None
    }
}

/// Whether `ancestor` covers `path`: equal, or a dotted prefix of it.
/// The root path covers everything.
fn covers(ancestor: &str, path: &str) -> bool {
    ancestor.is_empty()
        || path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'.')
}

/// Proper ancestor paths of `path`, outermost first. The root path `""` is
/// not considered an ancestor.
fn proper_ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .filter(|(_, c)| *c == '.')
        .map(move |(i, _)| &path[..i])
}

/// Resolve the sequence container at `path`, materializing an empty one
/// (with intermediate objects) when the path is absent or null.
fn sequence_at<'v>(value: &'v mut Value, path: &str) -> Result<&'v mut Vec<Value>> {
    let needs_init = matches!(value.at_path(path), None | Some(Value::Null));
    if needs_init {
        value.set_at_path(path, Value::Array(Vec::new()))?;
    }
    match value.at_path_mut(path) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(Error::WrongValueKind {
            path: path.to_string(),
            expected: "a sequence",
        }),
    }
}

/// The elements of the array or set at `path`, if there is one.
fn mutable_elements<'v>(value: &'v mut Value, path: &str) -> Option<&'v mut Vec<Value>> {
    match value.at_path_mut(path)? {
        Value::Array(items) | Value::Set(items) => Some(items),
        _ => None,
    }
}

/// Like [`sequence_at`], but an existing set qualifies too.
fn elements_or_init<'v>(value: &'v mut Value, path: &str) -> Result<&'v mut Vec<Value>> {
    if matches!(value.at_path(path), None | Some(Value::Null)) {
        value.set_at_path(path, Value::Array(Vec::new()))?;
    }
    match value.at_path_mut(path) {
        Some(Value::Array(items)) | Some(Value::Set(items)) => Ok(items),
        _ => Err(Error::WrongValueKind {
            path: path.to_string(),
            expected: "a sequence or set",
        }),
    }
}
