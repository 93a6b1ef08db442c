//! Error types for coordinated transactions.

use thiserror::Error;

use crate::model::TxId;
use crate::participant::ParticipantError;

/// Failure reason returned by [`Coordinator::run`](super::Coordinator::run).
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("order amount must be greater than zero")]
    InvalidAmount,

    #[error("no participants registered")]
    NoParticipants,

    /// A participant voted no; every participant was told to abort.
    #[error("transaction {tx_id} aborted: {participant} failed to prepare: {source}")]
    Prepare {
        tx_id: TxId,
        participant: String,
        source: ParticipantError,
    },

    /// Commit was decided but at least one participant did not apply it.
    #[error("transaction {tx_id} did not commit on {participant}: {source}")]
    CommitIncomplete {
        tx_id: TxId,
        participant: String,
        source: ParticipantError,
    },
}

impl CoordinatorError {
    /// The transaction this error belongs to, if one was started.
    pub fn tx_id(&self) -> Option<TxId> {
        match self {
            CoordinatorError::InvalidAmount | CoordinatorError::NoParticipants => None,
            CoordinatorError::Prepare { tx_id, .. }
            | CoordinatorError::CommitIncomplete { tx_id, .. } => Some(*tx_id),
        }
    }

    /// The participant error behind this failure, if any.
    pub fn participant_error(&self) -> Option<&ParticipantError> {
        match self {
            CoordinatorError::InvalidAmount | CoordinatorError::NoParticipants => None,
            CoordinatorError::Prepare { source, .. }
            | CoordinatorError::CommitIncomplete { source, .. } => Some(source),
        }
    }
}
