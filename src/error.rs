//! Error types for the tether engine.

use crate::schema::Issue;
use crate::transaction::TransactionState;
use crate::{Path, TransactionId};
use thiserror::Error;

/// All possible errors from the tether engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("schema validation rejected the record ({} issue(s))", .0.len())]
    Schema(Vec<Issue>),

    #[error("transaction is not accepting operations: state is {0}")]
    TransactionState(TransactionState),

    #[error("item is locked by transaction {owner}")]
    ItemLocked { owner: TransactionId },

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("value at '{path}' is not {expected}")]
    WrongValueKind { path: Path, expected: &'static str },
}

impl Error {
    /// The validation issues carried by a schema error, if any.
    pub fn issues(&self) -> Option<&[Issue]> {
        match self {
            Error::Schema(issues) => Some(issues),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
