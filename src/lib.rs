//! # Tether Engine
//!
//! A client-side optimistic mutation engine for synchronized collections.
//!
//! This crate provides the core logic for mutating structured records
//! optimistically while an external sync source streams authoritative
//! changes. Local mutations are captured as compact, path-addressed
//! deltas, coordinated inside transactions that lock items against
//! concurrent writers, and reconciled with inbound changes once the
//! source declares itself up-to-date.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or platform
//! - **Single-threaded cooperative**: every state transition happens on
//!   one logical turn; nothing suspends mid-contract
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Records and tracking
//!
//! Records are [`Value`] trees. A collection assigns each record an opaque
//! tracking id, stored at the reserved attribute [`TRACKING_ID_ATTR`] for
//! the record's lifetime and stripped when items are surfaced through the
//! mutation callback.
//!
//! ### Deltas
//!
//! Every mutation through a tracking [`Cursor`] is recorded as a
//! [`Delta`] entry keyed by dotted path: `$set`, `$unset`, the sequence
//! edits (`$push`, `$append`, `$prepend`, `$pop`, `$splice`), and the
//! reserved `$pull` and `$addToSet`. Deltas merge per tag and replay in a
//! fixed tag order.
//!
//! ### Transactions and locks
//!
//! A [`Transaction`] is a log plus a lifecycle (`began` →
//! `committing`/`rollingBack`). While a transaction holds an item's lock
//! no other transaction can mutate it. Mutations invoked without a
//! transaction collect on an implicit batch transaction settled by
//! [`Collection::flush`].
//!
//! ### Sync reconciliation
//!
//! Inbound [`SyncMessage`]s buffer in arrival order and apply atomically,
//! sorted by offset, once the source is up-to-date and no local window is
//! open.
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_engine::{Collection, Value};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), tether_engine::Error> {
//! let mut todos = Collection::new();
//!
//! // Insert without an explicit transaction: the mutation joins the
//! // implicit batch.
//! let todo = todos.insert(
//!     Value::from(json!({"title": "write docs", "done": false})),
//!     None,
//! )?;
//!
//! // Mutate through the tracking cursor; the write is recorded as a
//! // delta entry.
//! todos.update(&todo, |mut c| c.at("done").set(true), None)?;
//!
//! // Settle the batch.
//! todos.flush()?;
//!
//! assert_eq!(todos.items().len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod delta;
pub mod error;
pub mod schema;
pub mod sync;
pub mod tracked;
pub mod transaction;
pub mod value;

// Re-export main types at crate root
pub use collection::{
    strip_tracking_id, tracking_id_of, Collection, Mutation, MutationHandler, BATCH_OWNER,
};
pub use delta::{Delta, PopEnd, Splice};
pub use error::{Error, Result};
pub use schema::{FieldDef, FieldKind, Issue, RecordSchema, Validator};
pub use sync::{
    ChangeMessage, ChangeOperation, ControlMessage, SyncEngine, SyncHandler, SyncMessage,
    Unsubscribe,
};
pub use tracked::{Cursor, TrackedItem};
pub use transaction::{
    OperationKind, Settlement, SettlementStatus, Transaction, TransactionState, TxOperation,
};
pub use value::Value;

/// Type aliases for clarity
pub type TrackingId = String;
pub type TransactionId = String;
pub type SyncKey = String;
pub type Path = String;
pub type Offset = u64;

/// Reserved attribute carrying a record's tracking id.
pub const TRACKING_ID_ATTR: &str = "__tracking_id";
