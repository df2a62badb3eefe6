//! End-to-end scenarios for tether-engine.
//!
//! These tests drive whole flows through the public API: batched local
//! mutations, explicit transactions with lock contention, and sync
//! reconciliation around open mutation windows.

use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use tether_engine::{
    tracking_id_of, ChangeMessage, Collection, Error, Mutation, OperationKind, SyncEngine,
    SyncHandler, SyncMessage, Unsubscribe, Value, TRACKING_ID_ATTR,
};

fn record(raw: serde_json::Value) -> Value {
    Value::from(raw)
}

/// Collects every mutation callback invocation.
fn observed_collection() -> (Collection, Rc<RefCell<Vec<Vec<Mutation>>>>) {
    let calls: Rc<RefCell<Vec<Vec<Mutation>>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    let collection = Collection::new().on_mutation(move |mutations| {
        sink.borrow_mut().push(mutations.to_vec());
        Ok(())
    });
    (collection, calls)
}

// ============================================================================
// Batched (non-transacted) mutations
// ============================================================================

#[test]
fn batched_updates_settle_as_one_mutation() {
    let (mut collection, calls) = observed_collection();

    let item = collection
        .insert(record(json!({"id": "1", "count": 0})), None)
        .unwrap();
    for _ in 0..3 {
        collection
            .update(
                &item,
                |mut c| {
                    let next = c.at("count").get().and_then(Value::as_i64).unwrap_or(0) + 1;
                    c.at("count").set(next)
                },
                None,
            )
            .unwrap();
    }

    // Nothing settles before the batch is flushed.
    assert!(calls.borrow().is_empty());
    collection.flush().unwrap();

    let calls = calls.borrow();
    assert_eq!(calls.len(), 1, "exactly one callback per settled batch");
    let mutations = &calls[0];
    assert_eq!(mutations.len(), 1, "one entry per distinct tracking id");
    assert_eq!(
        mutations[0].item.at_path("count"),
        Some(&Value::Int(3)),
        "final record carries the last write"
    );
    assert_eq!(mutations[0].delta.set.get("count"), Some(&Value::Int(3)));
}

#[test]
fn flush_without_batch_is_noop() {
    let (mut collection, calls) = observed_collection();
    collection.flush().unwrap();
    assert!(calls.borrow().is_empty());
}

#[test]
fn operations_after_flush_open_a_new_batch() {
    let (mut collection, calls) = observed_collection();

    let item = collection.insert(record(json!({"n": 0})), None).unwrap();
    collection.flush().unwrap();

    collection
        .update(&item, |mut c| c.at("n").set(1), None)
        .unwrap();
    collection.flush().unwrap();

    let calls = calls.borrow();
    assert_eq!(calls.len(), 2);
    // The second window accumulated only its own delta.
    let second = &calls[1];
    assert_eq!(second[0].operation, OperationKind::Update);
    assert_eq!(second[0].delta.set.get("n"), Some(&Value::Int(1)));
}

// ============================================================================
// Explicit transactions and locks
// ============================================================================

#[test]
fn lock_contention_between_transactions() {
    let mut collection = Collection::new();
    let tx1 = collection.begin();
    let tx2 = collection.begin();

    let item = collection
        .insert(record(json!({"title": "mine"})), Some(&tx1))
        .unwrap();

    let err = collection
        .update(&item, |mut c| c.at("title").set("theirs"), Some(&tx2))
        .unwrap_err();
    assert_eq!(err, Error::ItemLocked { owner: tx1.clone() });

    let err = collection.remove(&item, Some(&tx2)).unwrap_err();
    assert_eq!(err, Error::ItemLocked { owner: tx1.clone() });

    // Loser left no trace.
    assert!(collection.transaction(&tx2).unwrap().operations().is_empty());
    assert_eq!(collection.transaction(&tx1).unwrap().operations().len(), 1);
    let tracking_id = tracking_id_of(&item).unwrap();
    assert_eq!(
        collection.get(tracking_id).unwrap().get("title"),
        Some(&Value::from("mine"))
    );

    // After tx1 settles, tx2 can take the lock.
    collection.commit(&tx1).unwrap();
    collection
        .update(&item, |mut c| c.at("title").set("theirs"), Some(&tx2))
        .unwrap();
    collection.commit(&tx2).unwrap();
    assert_eq!(
        collection.get(tracking_id).unwrap().get("title"),
        Some(&Value::from("theirs"))
    );
}

#[test]
fn one_mutation_entry_per_distinct_item() {
    let (mut collection, calls) = observed_collection();
    let tx = collection.begin();

    let first = collection
        .insert(record(json!({"n": 1})), Some(&tx))
        .unwrap();
    let second = collection
        .insert(record(json!({"n": 2})), Some(&tx))
        .unwrap();
    collection
        .update(&first, |mut c| c.at("n").set(10), Some(&tx))
        .unwrap();
    collection
        .update(&second, |mut c| c.at("n").set(20), Some(&tx))
        .unwrap();

    collection.commit(&tx).unwrap();

    let calls = calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 2, "two distinct tracking ids were touched");
    // First occurrence's kind wins for each.
    assert!(calls[0]
        .iter()
        .all(|mutation| mutation.operation == OperationKind::Insert));
}

#[test]
fn surfaced_items_carry_no_tracking_attribute() {
    let (mut collection, calls) = observed_collection();

    let item = collection
        .insert(record(json!({"name": "visible"})), None)
        .unwrap();
    assert!(item.get(TRACKING_ID_ATTR).is_some(), "stored form keeps it");
    collection.flush().unwrap();

    for mutations in calls.borrow().iter() {
        for mutation in mutations {
            assert_eq!(mutation.item.get(TRACKING_ID_ATTR), None);
        }
    }
}

#[test]
fn replaying_emitted_delta_reproduces_item() {
    let (mut collection, calls) = observed_collection();

    let original = json!({"profile": {"name": "a"}, "tags": ["x"]});
    let item = collection.insert(record(original.clone()), None).unwrap();
    collection
        .update(
            &item,
            |mut c| {
                c.at("profile").at("name").set("b")?;
                c.at("tags").push("y")?;
                c.at("score").set(10)
            },
            None,
        )
        .unwrap();
    collection.flush().unwrap();

    let calls = calls.borrow();
    let mutation = &calls[0][0];

    let mut replayed = record(original);
    mutation.delta.apply(&mut replayed).unwrap();
    assert_eq!(replayed, mutation.item);
}

#[test]
fn rollback_leaves_authoritative_state_and_clears_window() {
    let mut collection = Collection::new();

    let item = collection
        .insert(record(json!({"status": "stable"})), None)
        .unwrap();
    collection.flush().unwrap();
    let tracking_id = tracking_id_of(&item).unwrap().to_string();

    let tx = collection.begin();
    collection
        .update(&item, |mut c| c.at("status").set("doomed"), Some(&tx))
        .unwrap();
    collection.rollback(&tx).unwrap();

    assert_eq!(
        collection.get(&tracking_id).unwrap().get("status"),
        Some(&Value::from("stable")),
        "pending writes are flushed on rollback"
    );
    assert_eq!(collection.lock_owner(&tracking_id), None);

    // A fresh window starts clean.
    collection
        .update(&item, |mut c| c.at("status").set("revised"), None)
        .unwrap();
    collection.flush().unwrap();
    assert_eq!(
        collection.get(&tracking_id).unwrap().get("status"),
        Some(&Value::from("revised"))
    );
}

#[test]
fn remove_settles_by_dropping_item() {
    let (mut collection, calls) = observed_collection();

    let item = collection.insert(record(json!({"gone": true})), None).unwrap();
    collection.flush().unwrap();
    assert_eq!(collection.len(), 1);

    collection.remove(&item, None).unwrap();
    collection.flush().unwrap();

    assert!(collection.is_empty());
    let calls = calls.borrow();
    assert_eq!(calls[1].len(), 1);
    assert_eq!(calls[1][0].operation, OperationKind::Delete);
    assert_eq!(calls[1][0].item.get("gone"), Some(&Value::Bool(true)));
}

// ============================================================================
// Sync reconciliation
// ============================================================================

#[test]
fn sync_applies_only_after_locks_clear() {
    let mut collection = Collection::new();
    let tx = collection.begin();
    collection
        .insert(record(json!({"local": true})), Some(&tx))
        .unwrap();

    collection.handle_sync_message(SyncMessage::Change(ChangeMessage::insert(
        "r1",
        record(json!({"n": 1})),
        1,
    )));
    collection.handle_sync_message(SyncMessage::Change(ChangeMessage::insert(
        "r2",
        record(json!({"n": 2})),
        2,
    )));
    collection.handle_sync_message(SyncMessage::up_to_date());

    // The local window is still open: nothing applied.
    assert_eq!(collection.buffered_changes(), 2);
    assert_eq!(collection.len(), 1);
    assert!(collection.tracking_id_for_key("r1").is_none());

    collection.commit(&tx).unwrap();

    // Settlement re-probed the drain.
    assert_eq!(collection.buffered_changes(), 0);
    assert_eq!(collection.len(), 3);
    let r1 = collection.tracking_id_for_key("r1").unwrap();
    let r2 = collection.tracking_id_for_key("r2").unwrap();
    assert_ne!(r1, r2);
    assert_eq!(collection.get(r1).unwrap().get("n"), Some(&Value::Int(1)));
    assert_eq!(collection.get(r2).unwrap().get("n"), Some(&Value::Int(2)));
}

#[test]
fn sync_drain_is_offset_ordered_regardless_of_arrival() {
    let mut collection = Collection::new();

    // Arrival order scrambled: delete@3, insert@1, update@2.
    collection.handle_sync_message(SyncMessage::Change(ChangeMessage::delete("k", 3)));
    collection.handle_sync_message(SyncMessage::Change(ChangeMessage::insert(
        "k",
        record(json!({"v": 1})),
        1,
    )));
    collection.handle_sync_message(SyncMessage::Change(ChangeMessage::update(
        "k",
        record(json!({"v": 2})),
        2,
    )));
    collection.handle_sync_message(SyncMessage::up_to_date());

    // insert, then update, then delete: the key ends up gone.
    assert!(collection.is_empty());
    assert!(collection.tracking_id_for_key("k").is_none());
}

struct ScriptedEngine {
    queued: Vec<SyncMessage>,
}

impl SyncEngine for ScriptedEngine {
    fn subscribe(&mut self, mut handler: SyncHandler) -> Unsubscribe {
        for message in self.queued.drain(..) {
            handler(message);
        }
        Unsubscribe::new(|| {})
    }
}

#[test]
fn subscription_feeds_collection() {
    let collection = Rc::new(RefCell::new(Collection::new()));
    let mut engine = ScriptedEngine {
        queued: vec![
            SyncMessage::Change(ChangeMessage::insert("k1", record(json!({"v": 1})), 1)),
            SyncMessage::up_to_date(),
        ],
    };

    let token = tether_engine::sync::attach(&mut engine, Rc::clone(&collection));

    let collection = collection.borrow();
    assert_eq!(collection.len(), 1);
    assert!(collection.is_up_to_date());
    drop(collection);
    token.unsubscribe();
}

#[test]
fn local_and_remote_ids_never_collide() {
    let mut collection = Collection::new();

    let local = collection.insert(record(json!({"origin": "local"})), None).unwrap();
    collection.flush().unwrap();

    collection.handle_sync_message(SyncMessage::Change(ChangeMessage::insert(
        "remote-1",
        record(json!({"origin": "remote"})),
        1,
    )));
    collection.handle_sync_message(SyncMessage::up_to_date());

    let local_id = tracking_id_of(&local).unwrap();
    let remote_id = collection.tracking_id_for_key("remote-1").unwrap();
    assert_ne!(local_id, remote_id);
    assert_eq!(collection.len(), 2);
}
