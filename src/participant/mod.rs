//! Two-phase commit participants.
//!
//! Every resource domain implements [`Participant`]. A successful prepare
//! leaves a [`Reservation`] recorded in the participant's own
//! [`TransactionLog`]; commit and abort look it up by transaction ID, so no
//! live store handle is ever shared with the coordinator.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::Amount;
use crate::log::{LogEntry, TransactionLog, Transition, TxStatus};
use crate::model::{TxId, UserId};
use crate::store::{RowGuard, StoreError};

pub mod customer;
pub mod order;

mod error;
pub use error::{ErrorKind, ParticipantError};

/// Deadline carried by one transaction's prepare phase.
#[derive(Debug, Clone, Copy)]
pub struct TxContext {
    deadline: Option<Instant>,
}

impl TxContext {
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn unbounded() -> Self {
        Self { deadline: None }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Prepare arguments. Also the wire body of a remote prepare call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    #[serde(rename = "transaction_id")]
    pub tx_id: TxId,
    pub user_id: UserId,
    pub amount: Amount,
}

/// Token for a prepared, not yet finalized, change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub tx_id: TxId,
    pub user_id: UserId,
    pub amount: Amount,
}

impl From<&PrepareRequest> for Reservation {
    fn from(req: &PrepareRequest) -> Self {
        Self {
            tx_id: req.tx_id,
            user_id: req.user_id.clone(),
            amount: req.amount,
        }
    }
}

/// A resource owner taking part in two-phase commit.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Reserve the change. Must not mutate anything once `ctx` has expired.
    async fn prepare(
        &self,
        ctx: &TxContext,
        req: &PrepareRequest,
    ) -> Result<Reservation, ParticipantError>;

    /// Finalize a prepared change. Repeated calls are no-ops.
    async fn commit(&self, tx: TxId) -> Result<(), ParticipantError>;

    /// Reverse a prepared change. Repeated calls, and calls for a transaction
    /// never prepared here, are no-ops.
    async fn abort(&self, tx: TxId) -> Result<(), ParticipantError>;
}

/// Append the `PREPARE` entry for `req`, mapping a reused ID to `DuplicateTxId`.
///
/// The entry stays locked until the returned guard is released, so a
/// concurrent finalize waits for the rest of prepare.
fn log_prepared(
    log: &TransactionLog,
    req: &PrepareRequest,
) -> Result<RowGuard<LogEntry>, ParticipantError> {
    log.append(LogEntry::prepared(req.tx_id, req.user_id.clone(), req.amount))
        .map_err(|e| match e {
            StoreError::Duplicate { .. } => ParticipantError::DuplicateTxId(req.tx_id),
            e => e.into(),
        })
}

/// Lock the log entry for a finalize call.
///
/// Returns `None` when there is nothing left to do.
async fn open_transition(
    participant: &str,
    log: &TransactionLog,
    tx: TxId,
    target: TxStatus,
) -> Result<Option<RowGuard<LogEntry>>, ParticipantError> {
    match log.begin_transition(tx, target).await? {
        Transition::Pending(entry) => Ok(Some(entry)),
        Transition::AlreadyApplied => {
            debug!(participant, tx = %tx, "already {target}, skipping");
            Ok(None)
        }
        Transition::Tombstoned => {
            debug!(participant, tx = %tx, "abort for unknown transaction recorded");
            Ok(None)
        }
        Transition::Conflict(status) => Err(ParticipantError::InvalidState(tx, status)),
        Transition::Missing => Err(ParticipantError::TxNotFound(tx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_context_never_expires() {
        let ctx = TxContext::unbounded();
        assert!(!ctx.is_expired());
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn past_deadline_is_expired() {
        let ctx = TxContext::with_deadline(Instant::now());
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn prepare_request_wire_field_names() {
        let req = PrepareRequest {
            tx_id: TxId::new(),
            user_id: "alice".into(),
            amount: Amount::from_units(40),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["transaction_id"], req.tx_id.to_string());
        assert_eq!(value["user_id"], "alice");
        assert_eq!(value["amount"], 400_000);
    }
}
