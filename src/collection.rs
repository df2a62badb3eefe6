//! The collection coordinator.
//!
//! A collection owns the authoritative item map, issues tracking
//! identities, enforces per-item locks keyed by transaction, batches
//! non-transacted mutations into an implicit batch transaction, and
//! merges inbound sync changes atomically once the source has declared
//! itself up-to-date and no local window is open.
//!
//! Every record under management carries its tracking id at the reserved
//! attribute [`TRACKING_ID_ATTR`](crate::TRACKING_ID_ATTR); the id is
//! stripped from items surfaced through the mutation callback.

use crate::delta::Delta;
use crate::error::{Error, Result};
use crate::schema::Validator;
use crate::sync::{ChangeMessage, ChangeOperation, ControlMessage, SyncMessage};
use crate::tracked::{Cursor, TrackedItem};
use crate::transaction::{OperationKind, Settlement, SettlementStatus, Transaction};
use crate::value::Value;
use crate::{Path, SyncKey, TrackingId, TransactionId, TRACKING_ID_ATTR};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use ulid::Ulid;

/// Lock owner id used for mutations invoked without an explicit
/// transaction.
pub const BATCH_OWNER: &str = "batch";

/// One entry of the outward mutation callback: what happened to one item,
/// the settled record (tracking id stripped), and the final delta of its
/// mutation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub operation: OperationKind,
    pub item: Value,
    pub delta: Delta,
}

/// Callback invoked after each commit with one entry per distinct tracking
/// id the transaction touched. A window that ends by deleting an item
/// reports a delete; an item created and deleted inside the same window is
/// not reported. Failures are logged and swallowed; they do not roll back
/// the commit.
pub type MutationHandler =
    Box<dyn FnMut(&[Mutation]) -> std::result::Result<(), Box<dyn std::error::Error>>>;

#[derive(Default)]
struct SyncState {
    /// Change messages in arrival order; sorted by offset on drain.
    buffer: Vec<ChangeMessage>,
    keys: HashMap<SyncKey, TrackingId>,
    up_to_date: bool,
}

/// A synchronized collection of optimistically mutated records.
pub struct Collection {
    /// Authoritative records by tracking id.
    items: HashMap<TrackingId, Value>,
    /// Records with an un-settled local mutation window.
    pending: HashMap<TrackingId, TrackedItem>,
    /// Exclusive per-item locks, keyed to the owning transaction.
    locks: HashMap<TrackingId, TransactionId>,
    transactions: HashMap<TransactionId, Transaction>,
    /// The implicit transaction collecting non-transacted mutations.
    batch: Option<Transaction>,
    sync: SyncState,
    validator: Option<Box<dyn Validator>>,
    on_mutation: Option<MutationHandler>,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("items", &self.items.len())
            .field("pending", &self.pending.len())
            .field("locks", &self.locks)
            .field("transactions", &self.transactions.len())
            .field("batch_active", &self.batch.is_some())
            .field("buffered_changes", &self.sync.buffer.len())
            .field("up_to_date", &self.sync.up_to_date)
            .finish()
    }
}

impl Collection {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            pending: HashMap::new(),
            locks: HashMap::new(),
            transactions: HashMap::new(),
            batch: None,
            sync: SyncState::default(),
            validator: None,
            on_mutation: None,
        }
    }

    /// Attach a validator; insert and update run it synchronously.
    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Attach the outward mutation callback.
    pub fn on_mutation<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&[Mutation]) -> std::result::Result<(), Box<dyn std::error::Error>> + 'static,
    {
        self.on_mutation = Some(Box::new(handler));
        self
    }

    /// Open an explicit transaction and return its id.
    pub fn begin(&mut self) -> TransactionId {
        let id = Ulid::new().to_string();
        self.transactions.insert(id.clone(), Transaction::new(id.clone()));
        id
    }

    /// A registered, un-settled transaction.
    pub fn transaction(&self, transaction_id: &str) -> Option<&Transaction> {
        self.transactions.get(transaction_id)
    }

    /// The transaction id currently holding an item's lock.
    pub fn lock_owner(&self, tracking_id: &str) -> Option<&str> {
        self.locks.get(tracking_id).map(String::as_str)
    }

    /// Whether the sync source has declared its change set complete.
    pub fn is_up_to_date(&self) -> bool {
        self.sync.up_to_date
    }

    /// Number of buffered, not-yet-applied sync changes.
    pub fn buffered_changes(&self) -> usize {
        self.sync.buffer.len()
    }

    /// The tracking id mapped to a sync key, if the key has been seen.
    pub fn tracking_id_for_key(&self, key: &str) -> Option<&str> {
        self.sync.keys.get(key).map(String::as_str)
    }

    /// Register a new record. Validation (when configured) runs first; a
    /// failure raises a schema error with no state change. On success the
    /// record receives a fresh tracking id, enters a mutation window under
    /// the given transaction (or the implicit batch), and a snapshot of
    /// the tracked record is returned.
    pub fn insert(&mut self, record: Value, tx: Option<&str>) -> Result<Value> {
        self.ensure_transaction(tx)?;
        let mut record = self.validated(record)?;

        let tracking_id = allocate_tracking_id();
        match record.as_object_mut() {
            Some(object) => {
                object.insert(
                    TRACKING_ID_ATTR.to_string(),
                    Value::String(tracking_id.clone()),
                );
            }
            None => {
                return Err(Error::WrongValueKind {
                    path: Path::new(),
                    expected: "an object",
                });
            }
        }

        self.ensure_batch(tx);
        self.acquire_lock(&tracking_id, &owner_id(tx))?;
        let snapshot = record.clone();
        self.pending
            .insert(tracking_id.clone(), TrackedItem::new(tracking_id.clone(), record));
        self.record_operation(tx, OperationKind::Insert, &tracking_id)?;
        Ok(snapshot)
    }

    /// Mutate a registered record through its tracking wrapper. The
    /// tracking id is derived from the record's reserved attribute.
    ///
    /// When a validator is configured the updater first runs against a
    /// deep-cloned scratch wrapper and the post-state is validated; on
    /// failure the real wrapper is untouched and no lock is taken. The
    /// updater therefore must be callable twice.
    pub fn update<F>(&mut self, item: &Value, mut updater: F, tx: Option<&str>) -> Result<Value>
    where
        F: FnMut(Cursor<'_>) -> Result<()>,
    {
        let tracking_id = self.known_tracking_id(item)?;
        self.ensure_transaction(tx)?;
        let owner = owner_id(tx);
        self.check_lock(&tracking_id, &owner)?;

        if self.validator.is_some() {
            let mut scratch = match self.pending.get(&tracking_id) {
                Some(wrapper) => wrapper.clone(),
                None => TrackedItem::new(
                    tracking_id.clone(),
                    self.authoritative(&tracking_id)?.clone(),
                ),
            };
            updater(scratch.cursor())?;
            let candidate = strip_tracking_id(scratch.value());
            if let Some(validator) = &self.validator {
                validator.validate(&candidate).map_err(Error::Schema)?;
            }
        }

        self.ensure_batch(tx);
        self.acquire_lock(&tracking_id, &owner)?;
        if !self.pending.contains_key(&tracking_id) {
            let authoritative = self.authoritative(&tracking_id)?.clone();
            self.pending.insert(
                tracking_id.clone(),
                TrackedItem::new(tracking_id.clone(), authoritative),
            );
        }
        let wrapper = self
            .pending
            .get_mut(&tracking_id)
            .ok_or_else(|| Error::ItemNotFound(tracking_id.clone()))?;
        updater(wrapper.cursor())?;
        let snapshot = wrapper.value().clone();

        self.record_operation(tx, OperationKind::Update, &tracking_id)?;
        Ok(snapshot)
    }

    /// Mark a registered record for deletion. The lock is held through
    /// settlement; on commit the item and its wrapper are dropped.
    pub fn remove(&mut self, item: &Value, tx: Option<&str>) -> Result<()> {
        let tracking_id = self.known_tracking_id(item)?;
        self.ensure_transaction(tx)?;
        self.ensure_batch(tx);
        self.acquire_lock(&tracking_id, &owner_id(tx))?;
        self.record_operation(tx, OperationKind::Delete, &tracking_id)
    }

    /// Union of authoritative and pending records, preferring the pending
    /// (mutated) state of an item over its authoritative one.
    pub fn items(&self) -> Vec<Value> {
        let mut records = Vec::with_capacity(self.items.len() + self.pending.len());
        for (tracking_id, record) in &self.items {
            match self.pending.get(tracking_id) {
                Some(wrapper) => records.push(wrapper.value().clone()),
                None => records.push(record.clone()),
            }
        }
        for (tracking_id, wrapper) in &self.pending {
            if !self.items.contains_key(tracking_id) {
                records.push(wrapper.value().clone());
            }
        }
        records
    }

    /// Look up one record by tracking id, preferring pending state.
    pub fn get(&self, tracking_id: &str) -> Option<&Value> {
        self.pending
            .get(tracking_id)
            .map(TrackedItem::value)
            .or_else(|| self.items.get(tracking_id))
    }

    /// Number of distinct records, pending inserts included.
    pub fn len(&self) -> usize {
        let pending_only = self
            .pending
            .keys()
            .filter(|tracking_id| !self.items.contains_key(*tracking_id))
            .count();
        self.items.len() + pending_only
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit an explicit transaction and settle it.
    pub fn commit(&mut self, transaction_id: &str) -> Result<()> {
        let mut transaction = self
            .transactions
            .remove(transaction_id)
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))?;
        let settlement = transaction.commit()?;
        self.settle(settlement);
        Ok(())
    }

    /// Roll back an explicit transaction. Authoritative state is left
    /// untouched and pending wrappers of the window are discarded.
    pub fn rollback(&mut self, transaction_id: &str) -> Result<()> {
        let mut transaction = self
            .transactions
            .remove(transaction_id)
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))?;
        let settlement = transaction.rollback()?;
        self.settle(settlement);
        Ok(())
    }

    /// Commit the implicit batch transaction, if one is active.
    ///
    /// Mutations invoked without a transaction queue onto a single
    /// lazily-created batch whose lock owner is [`BATCH_OWNER`]; this is
    /// the end of the turn that settles them as one batch.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(mut batch) = self.batch.take() {
            let settlement = batch.commit()?;
            self.settle(settlement);
        }
        Ok(())
    }

    /// Feed one message from the sync source. Change messages buffer;
    /// the `up-to-date` control marks the buffer ready and attempts a
    /// drain. A drain also re-runs after every settlement.
    pub fn handle_sync_message(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::Change(change) => self.sync.buffer.push(change),
            SyncMessage::Control {
                control: ControlMessage::UpToDate,
            } => {
                self.sync.up_to_date = true;
                self.try_drain();
            }
        }
    }

    fn settle(&mut self, settlement: Settlement) {
        let Settlement {
            transaction_id,
            status,
            operations,
        } = settlement;

        let mut mutations: Vec<Mutation> = Vec::new();

        match status {
            SettlementStatus::Committed => {
                // The last operation per tracking id decides whether the
                // window nets out to a delete.
                let mut final_kinds: HashMap<TrackingId, OperationKind> =
                    HashMap::with_capacity(operations.len());
                for operation in &operations {
                    final_kinds.insert(operation.tracking_id.clone(), operation.kind);
                }

                let mut seen: HashSet<TrackingId> = HashSet::new();
                for operation in &operations {
                    let tracking_id = &operation.tracking_id;

                    // One outward entry per distinct tracking id, in first-
                    // occurrence order; the delta and record are the
                    // window's final state. A window that ends by deleting
                    // the item reports a delete, and an item both created
                    // and deleted inside the window is not reported at all.
                    if seen.insert(tracking_id.clone()) {
                        let ends_deleted =
                            final_kinds.get(tracking_id) == Some(&OperationKind::Delete);
                        let born_here = operation.kind == OperationKind::Insert;
                        if !(ends_deleted && born_here) {
                            let kind = if ends_deleted {
                                OperationKind::Delete
                            } else {
                                operation.kind
                            };
                            let delta = self
                                .pending
                                .get(tracking_id)
                                .map(|wrapper| wrapper.delta().clone())
                                .unwrap_or_default();
                            let record = self
                                .pending
                                .get(tracking_id)
                                .map(|wrapper| wrapper.value().clone())
                                .or_else(|| self.items.get(tracking_id).cloned());
                            if let Some(record) = record {
                                mutations.push(Mutation {
                                    operation: kind,
                                    item: strip_tracking_id(&record),
                                    delta,
                                });
                            }
                        }
                    }

                    // Ingest in acceptance order.
                    match operation.kind {
                        OperationKind::Insert | OperationKind::Update => {
                            if let Some(wrapper) = self.pending.get(tracking_id) {
                                self.items
                                    .insert(tracking_id.clone(), wrapper.value().clone());
                            }
                        }
                        OperationKind::Delete => {
                            self.items.remove(tracking_id);
                        }
                    }
                }
                for operation in &operations {
                    self.pending.remove(&operation.tracking_id);
                }
            }
            SettlementStatus::RolledBack => {
                // Authoritative state stays; un-settled user writes are
                // discarded with their wrappers.
                for operation in &operations {
                    self.pending.remove(&operation.tracking_id);
                }
            }
        }

        self.locks.retain(|_, owner| owner != &transaction_id);

        if status == SettlementStatus::Committed && !mutations.is_empty() {
            if let Some(handler) = self.on_mutation.as_mut() {
                if let Err(error) = handler(&mutations) {
                    tracing::warn!(%error, "mutation handler failed; commit stands");
                }
            }
        }

        self.try_drain();
    }

    fn try_drain(&mut self) {
        if !self.sync.up_to_date || self.sync.buffer.is_empty() {
            return;
        }
        if !self.locks.is_empty() || self.batch.is_some() || !self.transactions.is_empty() {
            tracing::debug!(
                buffered = self.sync.buffer.len(),
                "sync drain deferred; a local mutation window is open"
            );
            return;
        }
        let mut changes = std::mem::take(&mut self.sync.buffer);
        changes.sort_by_key(|change| change.offset);
        for change in changes {
            self.apply_sync_change(change);
        }
    }

    fn apply_sync_change(&mut self, change: ChangeMessage) {
        match change.operation {
            ChangeOperation::Insert => {
                let tracking_id = match self.sync.keys.get(&change.key) {
                    Some(existing) => existing.clone(),
                    None => {
                        let fresh = allocate_tracking_id();
                        self.sync.keys.insert(change.key.clone(), fresh.clone());
                        fresh
                    }
                };
                let mut record = change.value;
                if let Some(object) = record.as_object_mut() {
                    object.insert(
                        TRACKING_ID_ATTR.to_string(),
                        Value::String(tracking_id.clone()),
                    );
                }
                self.items.insert(tracking_id, record);
            }
            ChangeOperation::Update => {
                let Some(tracking_id) = self.sync.keys.get(&change.key).cloned() else {
                    tracing::debug!(
                        key = %change.key,
                        offset = change.offset,
                        "dropping sync update for unknown key"
                    );
                    return;
                };
                let Some(fields) = change.value.as_object() else {
                    tracing::debug!(key = %change.key, "dropping non-object sync update");
                    return;
                };
                if let Some(object) = self
                    .items
                    .get_mut(&tracking_id)
                    .and_then(Value::as_object_mut)
                {
                    for (name, value) in fields {
                        if name != TRACKING_ID_ATTR {
                            object.insert(name.clone(), value.clone());
                        }
                    }
                }
                // A live wrapper sees the same top-level writes, outside
                // its delta.
                if let Some(object) = self
                    .pending
                    .get_mut(&tracking_id)
                    .and_then(|wrapper| wrapper.value_mut().as_object_mut())
                {
                    for (name, value) in fields {
                        if name != TRACKING_ID_ATTR {
                            object.insert(name.clone(), value.clone());
                        }
                    }
                }
            }
            ChangeOperation::Delete => {
                if let Some(tracking_id) = self.sync.keys.remove(&change.key) {
                    self.items.remove(&tracking_id);
                    self.pending.remove(&tracking_id);
                }
            }
        }
    }

    fn validated(&self, record: Value) -> Result<Value> {
        match &self.validator {
            Some(validator) => validator.validate(&record).map_err(Error::Schema),
            None => Ok(record),
        }
    }

    /// Derive and verify the tracking id of a caller-supplied record.
    fn known_tracking_id(&self, item: &Value) -> Result<TrackingId> {
        let tracking_id = tracking_id_of(item)
            .ok_or_else(|| Error::ItemNotFound("record carries no tracking id".to_string()))?
            .to_string();
        if self.items.contains_key(&tracking_id) || self.pending.contains_key(&tracking_id) {
            Ok(tracking_id)
        } else {
            Err(Error::ItemNotFound(tracking_id))
        }
    }

    fn authoritative(&self, tracking_id: &str) -> Result<&Value> {
        self.items
            .get(tracking_id)
            .ok_or_else(|| Error::ItemNotFound(tracking_id.to_string()))
    }

    /// A mutation arriving without an explicit transaction activates the
    /// single batch transaction before any lock is taken, so every
    /// batch-owned lock has a settlement path.
    fn ensure_batch(&mut self, tx: Option<&str>) {
        if tx.is_none() && self.batch.is_none() {
            self.batch = Some(Transaction::new(BATCH_OWNER));
        }
    }

    fn ensure_transaction(&self, tx: Option<&str>) -> Result<()> {
        match tx {
            Some(id) if !self.transactions.contains_key(id) => {
                Err(Error::TransactionNotFound(id.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn record_operation(
        &mut self,
        tx: Option<&str>,
        kind: OperationKind,
        tracking_id: &str,
    ) -> Result<()> {
        match tx {
            Some(id) => {
                let transaction = self
                    .transactions
                    .get_mut(id)
                    .ok_or_else(|| Error::TransactionNotFound(id.to_string()))?;
                transaction.record(kind, tracking_id)
            }
            None => self
                .batch
                .get_or_insert_with(|| Transaction::new(BATCH_OWNER))
                .record(kind, tracking_id),
        }
    }

    fn acquire_lock(&mut self, tracking_id: &str, owner: &str) -> Result<()> {
        self.check_lock(tracking_id, owner)?;
        self.locks
            .entry(tracking_id.to_string())
            .or_insert_with(|| owner.to_string());
        Ok(())
    }

    /// Lock availability without acquisition. Re-assertion by the current
    /// owner is idempotent; any other owner fails.
    fn check_lock(&self, tracking_id: &str, owner: &str) -> Result<()> {
        match self.locks.get(tracking_id) {
            Some(existing) if existing != owner => Err(Error::ItemLocked {
                owner: existing.clone(),
            }),
            _ => Ok(()),
        }
    }
}

fn owner_id(tx: Option<&str>) -> TransactionId {
    tx.unwrap_or(BATCH_OWNER).to_string()
}

fn allocate_tracking_id() -> TrackingId {
    Ulid::new().to_string()
}

/// Read the tracking id stored on a record, if any.
pub fn tracking_id_of(record: &Value) -> Option<&str> {
    record.get(TRACKING_ID_ATTR).and_then(Value::as_str)
}

/// Clone a record without its reserved tracking attribute.
pub fn strip_tracking_id(record: &Value) -> Value {
    let mut stripped = record.clone();
    if let Some(object) = stripped.as_object_mut() {
        object.remove(TRACKING_ID_ATTR);
    }
    stripped
}
