//! Tracked items and the mutation-recording cursor.
//!
//! A [`TrackedItem`] wraps a record for the duration of a mutation window
//! and accumulates every change into a [`Delta`]. Mutations go through a
//! [`Cursor`], a handle bound to a dotted path inside the record: `at` and
//! `index` descend, the mutator methods write through to the underlying
//! value and record the matching delta entry.
//!
//! Recording keeps the delta coherent with the tracked value: replaying
//! the accumulated delta over a snapshot taken before the window opened
//! reproduces the tracked value. Where a combination of entries cannot be
//! replayed in tag order (for example a push after a pop on the same
//! sequence), the recording collapses to a whole-container `$set`.
//!
//! Not thread-safe; access is single-threaded and cooperative.

use crate::delta::{Delta, PopEnd, Splice};
use crate::error::{Error, Result};
use crate::value::{join_path, Value};
use crate::{Path, TrackingId};
use std::cmp::Ordering;

/// A record under mutation tracking.
#[derive(Debug, Clone)]
pub struct TrackedItem {
    tracking_id: TrackingId,
    value: Value,
    delta: Delta,
}

impl TrackedItem {
    /// Wrap a value. The delta starts empty.
    pub fn new(tracking_id: impl Into<TrackingId>, value: Value) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            value,
            delta: Delta::new(),
        }
    }

    pub fn tracking_id(&self) -> &str {
        &self.tracking_id
    }

    /// The current (post-mutation) record.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The accumulated delta. Empty tags are omitted when serialized.
    pub fn delta(&self) -> &Delta {
        &self.delta
    }

    /// A cursor at the root of the record.
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor {
            value: &mut self.value,
            delta: &mut self.delta,
            path: Path::new(),
        }
    }

    /// Direct value access that bypasses delta recording. Used when remote
    /// changes are mirrored onto a live wrapper.
    pub(crate) fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }
}

/// A mutation handle bound to one path inside a tracked record.
#[derive(Debug)]
pub struct Cursor<'a> {
    value: &'a mut Value,
    delta: &'a mut Delta,
    path: Path,
}

impl<'a> Cursor<'a> {
    /// Descend into an attribute.
    pub fn at(&mut self, key: &str) -> Cursor<'_> {
        Cursor {
            value: &mut *self.value,
            delta: &mut *self.delta,
            path: join_path(&self.path, key),
        }
    }

    /// Descend into a sequence index.
    pub fn index(&mut self, index: usize) -> Cursor<'_> {
        Cursor {
            value: &mut *self.value,
            delta: &mut *self.delta,
            path: join_path(&self.path, &index.to_string()),
        }
    }

    /// The dotted path this cursor is bound to; empty for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The value currently at this path, if present. Opaque leaves come
    /// back as-is; there is no descending into them.
    pub fn get(&self) -> Option<&Value> {
        self.value.at_path(&self.path)
    }

    /// Assign a value at this path. Writing a value equal to the current
    /// one records nothing. Replacing a compound records a single `$set`
    /// of the new value, never per-child entries.
    pub fn set(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if let Some(previous) = self.value.at_path(&self.path) {
            if previous == &value {
                return Ok(());
            }
        }
        self.value.set_at_path(&self.path, value.clone())?;
        if self.fold_into_rewritten_ancestor() {
            return Ok(());
        }
        self.delta.purge_at_and_below(&self.path);
        self.delta.set.insert(self.path.clone(), value);
        Ok(())
    }

    /// Delete the attribute at this path. Recorded even when the attribute
    /// is already absent; replay treats that as a no-op.
    pub fn unset(&mut self) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        self.value.remove_at_path(&self.path);
        if self.fold_into_rewritten_ancestor() {
            return Ok(());
        }
        self.delta.purge_at_and_below(&self.path);
        self.delta.unset.insert(self.path.clone(), true);
        Ok(())
    }

    /// Append one element to the sequence at this path. A sequence passed
    /// as the element is appended as a single element.
    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.array_mut()?.push(value.clone());
        if self.fold_into_rewritten_ancestor() {
            return Ok(());
        }
        if self.delta.pop.contains_key(&self.path) {
            self.collapse_here();
            return Ok(());
        }
        if let Some(entries) = self.delta.append.get_mut(&self.path) {
            entries.push(value);
        } else if let Some(prior) = self.delta.push.remove(&self.path) {
            self.delta
                .append
                .insert(self.path.clone(), vec![prior, value]);
        } else {
            self.delta.push.insert(self.path.clone(), value);
        }
        Ok(())
    }

    /// Append several elements. One element lowers to [`Cursor::push`];
    /// zero elements records nothing.
    pub fn push_all(&mut self, mut values: Vec<Value>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        if values.len() == 1 {
            let only = values.remove(0);
            return self.push(only);
        }
        self.array_mut()?.extend(values.iter().cloned());
        if self.fold_into_rewritten_ancestor() {
            return Ok(());
        }
        if self.delta.pop.contains_key(&self.path) {
            self.collapse_here();
            return Ok(());
        }
        if let Some(entries) = self.delta.append.get_mut(&self.path) {
            entries.extend(values);
        } else if let Some(prior) = self.delta.push.remove(&self.path) {
            let mut combined = vec![prior];
            combined.extend(values);
            self.delta.append.insert(self.path.clone(), combined);
        } else {
            self.delta.append.insert(self.path.clone(), values);
        }
        Ok(())
    }

    /// Insert elements at the front of the sequence at this path. Zero
    /// elements records nothing.
    pub fn unshift(&mut self, values: Vec<Value>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let _ = self.array_mut()?.splice(0..0, values.iter().cloned());
        if self.fold_into_rewritten_ancestor() {
            return Ok(());
        }
        if self.delta.reorders_sequence_at(&self.path) {
            self.collapse_here();
            return Ok(());
        }
        if let Some(existing) = self.delta.prepend.get_mut(&self.path) {
            let mut combined = values;
            combined.append(existing);
            *existing = combined;
        } else {
            self.delta.prepend.insert(self.path.clone(), values);
        }
        Ok(())
    }

    /// Remove and return the last element. Empty sequences record nothing.
    pub fn pop(&mut self) -> Result<Option<Value>> {
        self.remove_end(PopEnd::Last)
    }

    /// Remove and return the first element. Empty sequences record nothing.
    pub fn shift(&mut self) -> Result<Option<Value>> {
        self.remove_end(PopEnd::First)
    }

    fn remove_end(&mut self, end: PopEnd) -> Result<Option<Value>> {
        let items = self.array_mut()?;
        if items.is_empty() {
            return Ok(None);
        }
        let removed = match end {
            PopEnd::Last => items.pop(),
            PopEnd::First => Some(items.remove(0)),
        };
        if self.fold_into_rewritten_ancestor() {
            return Ok(removed);
        }
        if self.delta.reorders_sequence_at(&self.path) {
            self.collapse_here();
        } else {
            self.delta.pop.insert(self.path.clone(), end);
        }
        Ok(removed)
    }

    /// In-place sequence edit; returns the removed elements. The raw
    /// arguments are recorded; out-of-range arguments clamp on both the
    /// live edit and replay.
    pub fn splice(
        &mut self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let removed = {
            let elements = self.array_mut()?;
            let begin = start.min(elements.len());
            let end = (begin + delete_count).min(elements.len());
            elements.splice(begin..end, items.iter().cloned()).collect()
        };
        if self.fold_into_rewritten_ancestor() {
            return Ok(removed);
        }
        if self.delta.splice.contains_key(&self.path) {
            self.collapse_here();
        } else {
            self.delta
                .splice
                .insert(self.path.clone(), Splice::new(start, delete_count, items));
        }
        Ok(removed)
    }

    /// Sort the sequence at this path. Collapses to a `$set` of the whole
    /// new sequence.
    pub fn sort_by<F>(&mut self, compare: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.array_mut()?.sort_by(compare);
        self.record_container_snapshot();
        Ok(())
    }

    /// Reverse the sequence at this path. Collapses to a `$set`.
    pub fn reverse(&mut self) -> Result<()> {
        self.array_mut()?.reverse();
        self.record_container_snapshot();
        Ok(())
    }

    /// Insert into the set at this path if absent. Collapses to a `$set`
    /// of the whole new set.
    pub fn set_add(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let items = self.set_mut()?;
        if !items.contains(&value) {
            items.push(value);
        }
        self.record_container_snapshot();
        Ok(())
    }

    /// Remove from the set at this path; returns whether it was present.
    pub fn set_remove(&mut self, value: &Value) -> Result<bool> {
        let items = self.set_mut()?;
        let position = items.iter().position(|existing| existing == value);
        if let Some(index) = position {
            items.remove(index);
        }
        self.record_container_snapshot();
        Ok(position.is_some())
    }

    /// Clear the set at this path.
    pub fn set_clear(&mut self) -> Result<()> {
        self.set_mut()?.clear();
        self.record_container_snapshot();
        Ok(())
    }

    /// Insert or replace a map entry. Collapses to a `$set` of the whole
    /// new map.
    pub fn map_insert(&mut self, key: Value, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let entries = self.map_mut()?;
        match entries.iter_mut().find(|(existing, _)| existing == &key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key, value)),
        }
        self.record_container_snapshot();
        Ok(())
    }

    /// Remove a map entry, returning its value if present.
    pub fn map_remove(&mut self, key: &Value) -> Result<Option<Value>> {
        let entries = self.map_mut()?;
        let position = entries.iter().position(|(existing, _)| existing == key);
        let removed = position.map(|index| entries.remove(index).1);
        self.record_container_snapshot();
        Ok(removed)
    }

    /// Clear the map at this path.
    pub fn map_clear(&mut self) -> Result<()> {
        self.map_mut()?.clear();
        self.record_container_snapshot();
        Ok(())
    }

    fn array_mut(&mut self) -> Result<&mut Vec<Value>> {
        match self.value.at_path_mut(&self.path) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(Error::WrongValueKind {
                path: self.path.clone(),
                expected: "a sequence",
            }),
        }
    }

    fn set_mut(&mut self) -> Result<&mut Vec<Value>> {
        match self.value.at_path_mut(&self.path) {
            Some(Value::Set(items)) => Ok(items),
            _ => Err(Error::WrongValueKind {
                path: self.path.clone(),
                expected: "a set",
            }),
        }
    }

    fn map_mut(&mut self) -> Result<&mut Vec<(Value, Value)>> {
        match self.value.at_path_mut(&self.path) {
            Some(Value::Map(entries)) => Ok(entries),
            _ => Err(Error::WrongValueKind {
                path: self.path.clone(),
                expected: "a map",
            }),
        }
    }

    /// Sets, clears, and sequence edits on an ancestor make entries below
    /// it unreplayable in tag order. When such an ancestor exists, fold
    /// this recording into a whole-subtree `$set` at the outermost one.
    fn fold_into_rewritten_ancestor(&mut self) -> bool {
        if let Some(ancestor) = self.delta.rewriting_ancestor(&self.path) {
            let snapshot = self
                .value
                .at_path(&ancestor)
                .cloned()
                .unwrap_or(Value::Null);
            self.delta.purge_at_and_below(&ancestor);
            self.delta.set.insert(ancestor, snapshot);
            true
        } else {
            false
        }
    }

    /// Replace every entry at or below this path with one `$set` of the
    /// container's current state.
    fn collapse_here(&mut self) {
        let snapshot = self
            .value
            .at_path(&self.path)
            .cloned()
            .unwrap_or(Value::Null);
        self.delta.purge_at_and_below(&self.path);
        self.delta.set.insert(self.path.clone(), snapshot);
    }

    fn record_container_snapshot(&mut self) {
        if self.fold_into_rewritten_ancestor() {
            return;
        }
        self.collapse_here();
    }
}
