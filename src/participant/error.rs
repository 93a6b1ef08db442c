//! Error types for participant operations.

use thiserror::Error;

use crate::Amount;
use crate::log::TxStatus;
use crate::model::{TxId, UserId};
use crate::store::StoreError;

/// Coarse classification used by the coordinator and the wire layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Business rule violation, e.g. not enough funds.
    InsufficientResource,
    /// Unknown subject or transaction.
    NotFound,
    /// Deadline elapsed before prepare could start.
    Cancelled,
    /// Transaction ID reused, or finalized the other way.
    Conflict,
    /// Store or transport I/O failure.
    StoreFailure,
}

/// Error returned by [`Participant`](super::Participant) operations.
#[derive(Debug, Error)]
pub enum ParticipantError {
    #[error("insufficient available funds for user {0}: available {1}, requested {2}")]
    InsufficientFunds(UserId, Amount, Amount),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("transaction {0} not found")]
    TxNotFound(TxId),

    #[error("transaction {0} cancelled: deadline elapsed")]
    Cancelled(TxId),

    #[error("duplicate transaction id {0}")]
    DuplicateTxId(TxId),

    #[error("transaction {0} is already finalized as {1}")]
    InvalidState(TxId, TxStatus),

    #[error("transaction {0}: ledger row disagrees with its log entry")]
    Corrupted(TxId),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("remote participant returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("participant task failed: {0}")]
    TaskFailed(String),
}

impl ParticipantError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParticipantError::InsufficientFunds(..) => ErrorKind::InsufficientResource,
            ParticipantError::UserNotFound(_) | ParticipantError::TxNotFound(_) => {
                ErrorKind::NotFound
            }
            ParticipantError::Cancelled(_) => ErrorKind::Cancelled,
            ParticipantError::DuplicateTxId(_) | ParticipantError::InvalidState(..) => {
                ErrorKind::Conflict
            }
            ParticipantError::Corrupted(_)
            | ParticipantError::Store(_)
            | ParticipantError::Remote { .. }
            | ParticipantError::Transport(_)
            | ParticipantError::TaskFailed(_) => ErrorKind::StoreFailure,
        }
    }
}
