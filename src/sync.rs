//! Sync source interface.
//!
//! A collection consumes one external sync source through the
//! [`SyncEngine`] capability: `subscribe` registers a handler and returns
//! an [`Unsubscribe`] token. The source delivers [`SyncMessage`]s — change
//! messages carrying a keyed record and a strictly increasing offset, and
//! the `up-to-date` control message marking the buffered change set
//! complete and safe to apply.
//!
//! The buffering and drain rules live on the collection; this module owns
//! the vocabulary and the wiring.

use crate::collection::Collection;
use crate::value::Value;
use crate::{Offset, SyncKey};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// What a change message does to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// A keyed change from the sync source. Update messages carry full values
/// for the changed top-level fields only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage {
    pub key: SyncKey,
    pub value: Value,
    pub operation: ChangeOperation,
    /// Strictly monotonically increasing within one subscription.
    pub offset: Offset,
}

impl ChangeMessage {
    pub fn insert(key: impl Into<SyncKey>, value: Value, offset: Offset) -> Self {
        Self {
            key: key.into(),
            value,
            operation: ChangeOperation::Insert,
            offset,
        }
    }

    pub fn update(key: impl Into<SyncKey>, value: Value, offset: Offset) -> Self {
        Self {
            key: key.into(),
            value,
            operation: ChangeOperation::Update,
            offset,
        }
    }

    pub fn delete(key: impl Into<SyncKey>, offset: Offset) -> Self {
        Self {
            key: key.into(),
            value: Value::Null,
            operation: ChangeOperation::Delete,
            offset,
        }
    }
}

/// Out-of-band control state from the sync source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlMessage {
    UpToDate,
}

/// Everything a subscription handler can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum SyncMessage {
    Change(ChangeMessage),
    Control { control: ControlMessage },
}

impl SyncMessage {
    pub fn up_to_date() -> Self {
        SyncMessage::Control {
            control: ControlMessage::UpToDate,
        }
    }
}

/// A subscription handler.
pub type SyncHandler = Box<dyn FnMut(SyncMessage)>;

/// Token returned by [`SyncEngine::subscribe`]; dropping it keeps the
/// subscription alive, calling [`Unsubscribe::unsubscribe`] ends it.
pub struct Unsubscribe(Box<dyn FnOnce()>);

impl Unsubscribe {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self(Box::new(cancel))
    }

    pub fn unsubscribe(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Unsubscribe")
    }
}

/// The sync source capability.
pub trait SyncEngine {
    fn subscribe(&mut self, handler: SyncHandler) -> Unsubscribe;
}

/// Wire a shared collection into a sync engine. Messages are forwarded to
/// [`Collection::handle_sync_message`] as they arrive; the single-threaded
/// cooperative model makes the `Rc<RefCell<_>>` handle sufficient.
pub fn attach(engine: &mut dyn SyncEngine, collection: Rc<RefCell<Collection>>) -> Unsubscribe {
    engine.subscribe(Box::new(move |message| {
        collection.borrow_mut().handle_sync_message(message);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_message_constructors() {
        let insert = ChangeMessage::insert("k1", Value::from(json!({"a": 1})), 7);
        assert_eq!(insert.operation, ChangeOperation::Insert);
        assert_eq!(insert.offset, 7);

        let delete = ChangeMessage::delete("k1", 8);
        assert_eq!(delete.operation, ChangeOperation::Delete);
        assert_eq!(delete.value, Value::Null);
    }

    #[test]
    fn message_serialization() {
        let message = SyncMessage::Change(ChangeMessage::update(
            "k1",
            Value::from(json!({"count": 2})),
            3,
        ));
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["type"], "change");
        assert_eq!(encoded["operation"], "update");
        assert_eq!(encoded["offset"], 3);

        let control = serde_json::to_value(SyncMessage::up_to_date()).unwrap();
        assert_eq!(control["type"], "control");
        assert_eq!(control["control"], "up-to-date");
    }

    #[test]
    fn unsubscribe_invokes_cancel() {
        use std::cell::Cell;

        let cancelled = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cancelled);
        let token = Unsubscribe::new(move || flag.set(true));
        token.unsubscribe();
        assert!(cancelled.get());
    }
}
