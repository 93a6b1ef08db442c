//! Customer ledger participant: reserves funds against a customer balance.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use super::{
    Participant, ParticipantError, PrepareRequest, Reservation, TxContext, log_prepared,
    open_transition,
};
use crate::Amount;
use crate::log::{LogEntry, TransactionLog, TxStatus};
use crate::model::{TxId, UserId};
use crate::store::{StoreError, Table};

/// A customer balance split into spendable and held funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    pub user_id: UserId,
    pub available: Amount,
    pub reserved: Amount,
}

impl Customer {
    pub fn new(user_id: UserId, balance: Amount) -> Self {
        Self {
            user_id,
            available: balance,
            reserved: Amount::ZERO,
        }
    }

    pub fn total(&self) -> Amount {
        self.available + self.reserved
    }

    /// Move `amount` from available to reserved. Returns `false`, leaving the
    /// balances untouched, when available funds do not cover it.
    fn reserve(&mut self, amount: Amount) -> bool {
        match (
            self.available.checked_sub(amount),
            self.reserved.checked_add(amount),
        ) {
            (Some(available), Some(reserved)) => {
                self.available = available;
                self.reserved = reserved;
                true
            }
            _ => false,
        }
    }

    /// Drop `amount` from reserved for good.
    fn settle(&mut self, amount: Amount) -> bool {
        match self.reserved.checked_sub(amount) {
            Some(reserved) => {
                self.reserved = reserved;
                true
            }
            None => false,
        }
    }

    /// Return `amount` from reserved to available.
    fn release(&mut self, amount: Amount) -> bool {
        match (
            self.available.checked_add(amount),
            self.reserved.checked_sub(amount),
        ) {
            (Some(available), Some(reserved)) => {
                self.available = available;
                self.reserved = reserved;
                true
            }
            _ => false,
        }
    }
}

/// Rows owned by the customer participant.
pub struct CustomerStore {
    customers: Table<UserId, Customer>,
    log: TransactionLog,
}

impl CustomerStore {
    pub fn new() -> Self {
        Self {
            customers: Table::new("customers"),
            log: TransactionLog::new("customer_transaction_log"),
        }
    }
}

impl Default for CustomerStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CustomerParticipant {
    store: Arc<CustomerStore>,
}

impl CustomerParticipant {
    pub const NAME: &'static str = "customer";

    pub fn new(store: Arc<CustomerStore>) -> Self {
        Self { store }
    }

    /// Register a customer with an opening balance. Not part of 2PC.
    pub fn create(&self, user_id: UserId, balance: Amount) -> Result<(), StoreError> {
        self.store
            .customers
            .insert(user_id.clone(), Customer::new(user_id, balance))
    }

    pub async fn customer(&self, user_id: &UserId) -> Result<Option<Customer>, StoreError> {
        self.store.customers.get(user_id).await
    }

    pub async fn customers(&self) -> Result<Vec<Customer>, StoreError> {
        let mut customers: Vec<Customer> = self
            .store
            .customers
            .snapshot()
            .await?
            .into_iter()
            .map(|(_, customer)| customer)
            .collect();
        customers.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(customers)
    }

    pub async fn log_entry(&self, tx: TxId) -> Result<Option<LogEntry>, StoreError> {
        self.store.log.get(tx).await
    }

    /// Settle or release the reservation behind `tx`, depending on `target`.
    async fn finalize(&self, tx: TxId, target: TxStatus) -> Result<(), ParticipantError> {
        let Some(mut entry) = open_transition(Self::NAME, &self.store.log, tx, target).await?
        else {
            return Ok(());
        };

        let mut customer = self
            .store
            .customers
            .lock(&entry.user_id)
            .await?
            .ok_or_else(|| ParticipantError::UserNotFound(entry.user_id.clone()))?;

        let applied = match target {
            TxStatus::Commit => customer.settle(entry.amount),
            _ => customer.release(entry.amount),
        };
        if !applied {
            return Err(ParticipantError::Corrupted(tx));
        }

        let (entry_user, entry_amount) = (entry.user_id.clone(), entry.amount);
        entry.mark(target);
        customer.commit();
        entry.commit();

        info!(
            participant = Self::NAME,
            tx = %tx,
            user = %entry_user,
            amount = %entry_amount,
            "{target} applied"
        );
        Ok(())
    }
}

#[async_trait]
impl Participant for CustomerParticipant {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn prepare(
        &self,
        ctx: &TxContext,
        req: &PrepareRequest,
    ) -> Result<Reservation, ParticipantError> {
        if ctx.is_expired() {
            return Err(ParticipantError::Cancelled(req.tx_id));
        }

        let mut customer = self
            .store
            .customers
            .lock(&req.user_id)
            .await?
            .ok_or_else(|| ParticipantError::UserNotFound(req.user_id.clone()))?;

        // the deadline may have passed while waiting for the row lock
        if ctx.is_expired() {
            return Err(ParticipantError::Cancelled(req.tx_id));
        }

        if !customer.reserve(req.amount) {
            return Err(ParticipantError::InsufficientFunds(
                req.user_id.clone(),
                customer.available,
                req.amount,
            ));
        }

        let entry = log_prepared(&self.store.log, req)?;
        customer.commit();
        entry.commit();

        info!(
            participant = Self::NAME,
            tx = %req.tx_id,
            user = %req.user_id,
            amount = %req.amount,
            "prepared"
        );
        Ok(Reservation::from(req))
    }

    async fn commit(&self, tx: TxId) -> Result<(), ParticipantError> {
        self.finalize(tx, TxStatus::Commit).await
    }

    async fn abort(&self, tx: TxId) -> Result<(), ParticipantError> {
        self.finalize(tx, TxStatus::Abort).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // test utils

    fn participant_with(user: &str, balance: u64) -> CustomerParticipant {
        let participant = CustomerParticipant::new(Arc::new(CustomerStore::new()));
        participant
            .create(user.to_string(), Amount::from_units(balance))
            .unwrap();
        participant
    }

    fn request(user: &str, amount: u64) -> PrepareRequest {
        PrepareRequest {
            tx_id: TxId::new(),
            user_id: user.to_string(),
            amount: Amount::from_units(amount),
        }
    }

    async fn balances(participant: &CustomerParticipant, user: &str) -> (Amount, Amount) {
        let customer = participant
            .customer(&user.to_string())
            .await
            .unwrap()
            .unwrap();
        (customer.available, customer.reserved)
    }

    async fn status(participant: &CustomerParticipant, tx: TxId) -> TxStatus {
        participant.log_entry(tx).await.unwrap().unwrap().status
    }

    // Customer

    #[test]
    fn reserve_rejects_overdraw_without_mutation() {
        let mut customer = Customer::new("alice".into(), Amount::from_units(30));
        assert!(!customer.reserve(Amount::from_units(40)));
        assert_eq!(customer.available, Amount::from_units(30));
        assert_eq!(customer.reserved, Amount::ZERO);
    }

    #[test]
    fn reserve_settle_release_keep_totals() {
        let mut customer = Customer::new("alice".into(), Amount::from_units(100));
        assert!(customer.reserve(Amount::from_units(40)));
        assert_eq!(customer.total(), Amount::from_units(100));

        assert!(customer.release(Amount::from_units(40)));
        assert_eq!(customer.available, Amount::from_units(100));

        assert!(customer.reserve(Amount::from_units(40)));
        assert!(customer.settle(Amount::from_units(40)));
        assert_eq!(customer.total(), Amount::from_units(60));
        assert!(!customer.settle(Amount::from_units(1)));
    }

    #[test]
    fn create_duplicate_customer_fails() {
        let participant = participant_with("alice", 100);
        let result = participant.create("alice".into(), Amount::from_units(5));
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    // Prepare

    #[tokio::test]
    async fn prepare_moves_funds_to_reserved() {
        let participant = participant_with("alice", 100);
        let req = request("alice", 40);

        let reservation = participant
            .prepare(&TxContext::unbounded(), &req)
            .await
            .unwrap();
        assert_eq!(reservation.tx_id, req.tx_id);
        assert_eq!(reservation.amount, Amount::from_units(40));

        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(60), Amount::from_units(40))
        );
        assert_eq!(status(&participant, req.tx_id).await, TxStatus::Prepare);
    }

    #[tokio::test]
    async fn prepare_insufficient_funds_leaves_balances_unchanged() {
        let participant = participant_with("alice", 30);
        let req = request("alice", 40);

        let result = participant.prepare(&TxContext::unbounded(), &req).await;
        assert!(matches!(
            result,
            Err(ParticipantError::InsufficientFunds(_, _, _))
        ));
        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(30), Amount::ZERO)
        );
        assert!(participant.log_entry(req.tx_id).await.unwrap().is_none());

        // the row lock was released: a fitting prepare goes through
        participant
            .prepare(&TxContext::unbounded(), &request("alice", 30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn prepare_unknown_user_fails() {
        let participant = participant_with("alice", 100);
        let result = participant
            .prepare(&TxContext::unbounded(), &request("bob", 1))
            .await;
        assert!(matches!(result, Err(ParticipantError::UserNotFound(user)) if user == "bob"));
    }

    #[tokio::test]
    async fn prepare_after_deadline_is_cancelled_without_mutation() {
        let participant = participant_with("alice", 100);
        let req = request("alice", 40);
        let ctx = TxContext::with_deadline(tokio::time::Instant::now());

        let result = participant.prepare(&ctx, &req).await;
        assert!(matches!(result, Err(ParticipantError::Cancelled(tx)) if tx == req.tx_id));
        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(100), Amount::ZERO)
        );
        assert!(participant.log_entry(req.tx_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prepare_duplicate_tx_id_rolls_back() {
        let participant = participant_with("alice", 100);
        let req = request("alice", 40);
        participant
            .prepare(&TxContext::unbounded(), &req)
            .await
            .unwrap();

        let result = participant.prepare(&TxContext::unbounded(), &req).await;
        assert!(matches!(result, Err(ParticipantError::DuplicateTxId(_))));
        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(60), Amount::from_units(40))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_prepares_on_one_customer_are_serialized() {
        let participant = Arc::new(participant_with("alice", 100));
        let first = request("alice", 60);
        let second = request("alice", 60);

        let (a, b) = tokio::join!(
            {
                let participant = Arc::clone(&participant);
                tokio::spawn(async move {
                    participant.prepare(&TxContext::unbounded(), &first).await
                })
            },
            {
                let participant = Arc::clone(&participant);
                tokio::spawn(async move {
                    participant.prepare(&TxContext::unbounded(), &second).await
                })
            }
        );
        let results = [a.unwrap(), b.unwrap()];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(ParticipantError::InsufficientFunds(..))))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(insufficient, 1);
        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(40), Amount::from_units(60))
        );
    }

    // Commit

    #[tokio::test]
    async fn commit_releases_reservation_for_good() {
        let participant = participant_with("alice", 100);
        let req = request("alice", 40);
        participant
            .prepare(&TxContext::unbounded(), &req)
            .await
            .unwrap();

        participant.commit(req.tx_id).await.unwrap();

        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(60), Amount::ZERO)
        );
        assert_eq!(status(&participant, req.tx_id).await, TxStatus::Commit);
    }

    #[tokio::test]
    async fn commit_twice_is_idempotent() {
        let participant = participant_with("alice", 100);
        let req = request("alice", 40);
        participant
            .prepare(&TxContext::unbounded(), &req)
            .await
            .unwrap();

        participant.commit(req.tx_id).await.unwrap();
        participant.commit(req.tx_id).await.unwrap();

        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(60), Amount::ZERO)
        );
        assert_eq!(status(&participant, req.tx_id).await, TxStatus::Commit);
    }

    #[tokio::test]
    async fn commit_unknown_tx_fails() {
        let participant = participant_with("alice", 100);
        let tx = TxId::new();

        let result = participant.commit(tx).await;
        assert!(matches!(result, Err(ParticipantError::TxNotFound(t)) if t == tx));
        assert!(participant.log_entry(tx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_after_abort_fails() {
        let participant = participant_with("alice", 100);
        let req = request("alice", 40);
        participant
            .prepare(&TxContext::unbounded(), &req)
            .await
            .unwrap();
        participant.abort(req.tx_id).await.unwrap();

        let result = participant.commit(req.tx_id).await;
        assert!(matches!(
            result,
            Err(ParticipantError::InvalidState(_, TxStatus::Abort))
        ));
        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(100), Amount::ZERO)
        );
    }

    // Abort

    #[tokio::test]
    async fn abort_restores_pre_prepare_balance() {
        let participant = participant_with("alice", 100);
        let req = request("alice", 40);
        participant
            .prepare(&TxContext::unbounded(), &req)
            .await
            .unwrap();

        participant.abort(req.tx_id).await.unwrap();
        participant.abort(req.tx_id).await.unwrap();

        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(100), Amount::ZERO)
        );
        assert_eq!(status(&participant, req.tx_id).await, TxStatus::Abort);
    }

    #[tokio::test]
    async fn abort_unknown_tx_is_a_no_op() {
        let participant = participant_with("alice", 100);
        let req = request("alice", 40);

        participant.abort(req.tx_id).await.unwrap();
        assert_eq!(status(&participant, req.tx_id).await, TxStatus::Abort);
        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(100), Amount::ZERO)
        );

        // a prepare arriving after the abort is refused
        let late = participant.prepare(&TxContext::unbounded(), &req).await;
        assert!(matches!(late, Err(ParticipantError::DuplicateTxId(_))));
        assert_eq!(
            balances(&participant, "alice").await,
            (Amount::from_units(100), Amount::ZERO)
        );
    }
}
