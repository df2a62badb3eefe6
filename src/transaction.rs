//! Transaction lifecycle and operation log.
//!
//! A transaction is a log plus a lifecycle: mutation commands append to
//! the log while the transaction is open, and settling it (commit or
//! rollback) produces exactly one outward [`Settlement`] event carrying
//! the log. The transaction never mutates records itself; the owning
//! collection consumes the settlement.

use crate::error::{Error, Result};
use crate::{TrackingId, TransactionId};
use serde::{Deserialize, Serialize};

/// Lifecycle states. `Began` is the only state accepting operations; the
/// other two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionState {
    Began,
    Committing,
    RollingBack,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Began => write!(f, "began"),
            TransactionState::Committing => write!(f, "committing"),
            TransactionState::RollingBack => write!(f, "rollingBack"),
        }
    }
}

/// The kind of a logged mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOperation {
    pub kind: OperationKind,
    pub tracking_id: TrackingId,
}

/// How a transaction settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Committed,
    RolledBack,
}

/// The single outward event of a settled transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub transaction_id: TransactionId,
    pub status: SettlementStatus,
    /// The operation log, in acceptance order.
    pub operations: Vec<TxOperation>,
}

/// A transaction: identity, state, and operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    operations: Vec<TxOperation>,
}

impl Transaction {
    /// Open a transaction in `Began`.
    pub fn new(id: impl Into<TransactionId>) -> Self {
        Self {
            id: id.into(),
            state: TransactionState::Began,
            operations: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The operations accepted so far, in order.
    pub fn operations(&self) -> &[TxOperation] {
        &self.operations
    }

    /// Append a mutation to the log. Fails outside `Began`.
    pub fn record(&mut self, kind: OperationKind, tracking_id: impl Into<TrackingId>) -> Result<()> {
        self.guard_open()?;
        self.operations.push(TxOperation {
            kind,
            tracking_id: tracking_id.into(),
        });
        Ok(())
    }

    pub fn insert(&mut self, tracking_id: impl Into<TrackingId>) -> Result<()> {
        self.record(OperationKind::Insert, tracking_id)
    }

    pub fn update(&mut self, tracking_id: impl Into<TrackingId>) -> Result<()> {
        self.record(OperationKind::Update, tracking_id)
    }

    pub fn delete(&mut self, tracking_id: impl Into<TrackingId>) -> Result<()> {
        self.record(OperationKind::Delete, tracking_id)
    }

    /// Transition to `Committing` and emit the settlement. Irreversible.
    pub fn commit(&mut self) -> Result<Settlement> {
        self.guard_open()?;
        self.state = TransactionState::Committing;
        Ok(Settlement {
            transaction_id: self.id.clone(),
            status: SettlementStatus::Committed,
            operations: std::mem::take(&mut self.operations),
        })
    }

    /// Transition to `RollingBack` and emit the settlement. Irreversible.
    pub fn rollback(&mut self) -> Result<Settlement> {
        self.guard_open()?;
        self.state = TransactionState::RollingBack;
        Ok(Settlement {
            transaction_id: self.id.clone(),
            status: SettlementStatus::RolledBack,
            operations: std::mem::take(&mut self.operations),
        })
    }

    fn guard_open(&self) -> Result<()> {
        if self.state == TransactionState::Began {
            Ok(())
        } else {
            Err(Error::TransactionState(self.state))
        }
    }
}
