//! Per-participant transaction log.
//!
//! One entry per transaction ID. The entry's status gates every finalize
//! mutation, which is what makes commit and abort idempotent.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;
use crate::model::{TxId, UserId};
use crate::store::{RowGuard, StoreError, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Prepare,
    Commit,
    Abort,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Prepare => f.write_str("PREPARE"),
            TxStatus::Commit => f.write_str("COMMIT"),
            TxStatus::Abort => f.write_str("ABORT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub tx_id: TxId,
    /// Empty for abort tombstones.
    pub user_id: UserId,
    pub amount: Amount,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn prepared(tx_id: TxId, user_id: UserId, amount: Amount) -> Self {
        let now = Utc::now();
        Self {
            tx_id,
            user_id,
            amount,
            status: TxStatus::Prepare,
            created_at: now,
            updated_at: now,
        }
    }

    /// Abort recorded for a transaction this participant never prepared.
    fn tombstone(tx_id: TxId) -> Self {
        let now = Utc::now();
        Self {
            tx_id,
            user_id: UserId::new(),
            amount: Amount::ZERO,
            status: TxStatus::Abort,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark(&mut self, status: TxStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Result of [`TransactionLog::begin_transition`].
pub enum Transition {
    /// Entry is `PREPARE` and locked; the caller applies its mutation, marks
    /// the entry and commits both.
    Pending(RowGuard<LogEntry>),
    /// Entry already carries the target status.
    AlreadyApplied,
    /// Entry is terminal with the opposite status.
    Conflict(TxStatus),
    /// No entry, target was `COMMIT`.
    Missing,
    /// No entry, target was `ABORT`; a tombstone has been written.
    Tombstoned,
}

pub struct TransactionLog {
    entries: Table<TxId, LogEntry>,
}

impl TransactionLog {
    pub fn new(name: &'static str) -> Self {
        Self {
            entries: Table::new(name),
        }
    }

    /// Append a new entry and keep it locked until the guard is released.
    /// Fails with `Duplicate` if the ID is already logged.
    pub fn append(&self, entry: LogEntry) -> Result<RowGuard<LogEntry>, StoreError> {
        self.entries.insert_locked(entry.tx_id, entry)
    }

    pub async fn get(&self, tx: TxId) -> Result<Option<LogEntry>, StoreError> {
        self.entries.get(&tx).await
    }

    /// Lock the entry for `tx` and decide whether moving it to `target` still
    /// has work to do.
    pub async fn begin_transition(
        &self,
        tx: TxId,
        target: TxStatus,
    ) -> Result<Transition, StoreError> {
        loop {
            if let Some(entry) = self.entries.lock(&tx).await? {
                let current = entry.status;
                return Ok(match current {
                    TxStatus::Prepare => Transition::Pending(entry),
                    status if status == target => Transition::AlreadyApplied,
                    status => Transition::Conflict(status),
                });
            }

            if target != TxStatus::Abort {
                return Ok(Transition::Missing);
            }

            match self.entries.insert(tx, LogEntry::tombstone(tx)) {
                Ok(()) => return Ok(Transition::Tombstoned),
                // a prepare landed between the lookup and the insert
                Err(StoreError::Duplicate { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with_prepared(tx: TxId) -> TransactionLog {
        let log = TransactionLog::new("test_log");
        log.append(LogEntry::prepared(tx, "alice".into(), Amount::from_units(40)))
            .unwrap();
        log
    }

    #[test]
    fn append_duplicate_fails() {
        let tx = TxId::new();
        let log = log_with_prepared(tx);
        let result = log.append(LogEntry::prepared(tx, "bob".into(), Amount::from_units(1)));
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[tokio::test]
    async fn prepared_entry_is_pending() {
        let tx = TxId::new();
        let log = log_with_prepared(tx);

        let Transition::Pending(mut entry) =
            log.begin_transition(tx, TxStatus::Commit).await.unwrap()
        else {
            panic!("expected pending transition");
        };
        entry.mark(TxStatus::Commit);
        entry.commit();

        assert_eq!(log.get(tx).await.unwrap().unwrap().status, TxStatus::Commit);
    }

    #[tokio::test]
    async fn repeated_transition_is_already_applied() {
        let tx = TxId::new();
        let log = log_with_prepared(tx);
        if let Transition::Pending(mut entry) =
            log.begin_transition(tx, TxStatus::Abort).await.unwrap()
        {
            entry.mark(TxStatus::Abort);
            entry.commit();
        }

        assert!(matches!(
            log.begin_transition(tx, TxStatus::Abort).await.unwrap(),
            Transition::AlreadyApplied
        ));
        assert!(matches!(
            log.begin_transition(tx, TxStatus::Commit).await.unwrap(),
            Transition::Conflict(TxStatus::Abort)
        ));
    }

    #[tokio::test]
    async fn missing_commit_is_reported() {
        let log = TransactionLog::new("test_log");
        let tx = TxId::new();
        assert!(matches!(
            log.begin_transition(tx, TxStatus::Commit).await.unwrap(),
            Transition::Missing
        ));
        assert!(log.get(tx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_abort_writes_tombstone() {
        let log = TransactionLog::new("test_log");
        let tx = TxId::new();
        assert!(matches!(
            log.begin_transition(tx, TxStatus::Abort).await.unwrap(),
            Transition::Tombstoned
        ));

        let entry = log.get(tx).await.unwrap().unwrap();
        assert_eq!(entry.status, TxStatus::Abort);
        assert_eq!(entry.amount, Amount::ZERO);

        // a late prepare for the same transaction is refused
        let late = log.append(LogEntry::prepared(tx, "alice".into(), Amount::from_units(1)));
        assert!(late.is_err());
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&TxStatus::Prepare).unwrap(), "\"PREPARE\"");
        assert_eq!(TxStatus::Commit.to_string(), "COMMIT");
    }
}
