//! Order ledger participant: creates the order record at prepare time.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Committed,
    // Committed and Aborted are final states
    Aborted,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => f.write_str("PENDING"),
            OrderStatus::Committed => f.write_str("COMMITTED"),
            OrderStatus::Aborted => f.write_str("ABORTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    /// Same as the transaction that created it.
    pub order_id: TxId,
    pub user_id: UserId,
    pub amount: Amount,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    fn pending(req: &PrepareRequest) -> Self {
        let now = Utc::now();
        Self {
            order_id: req.tx_id,
            user_id: req.user_id.clone(),
            amount: req.amount,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Rows owned by the order participant.
pub struct OrderStore {
    orders: Table<TxId, Order>,
    log: TransactionLog,
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            orders: Table::new("orders"),
            log: TransactionLog::new("order_transaction_log"),
        }
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct OrderParticipant {
    store: Arc<OrderStore>,
}

impl OrderParticipant {
    pub const NAME: &'static str = "order";

    pub fn new(store: Arc<OrderStore>) -> Self {
        Self { store }
    }

    pub async fn order(&self, order_id: TxId) -> Result<Option<Order>, StoreError> {
        self.store.orders.get(&order_id).await
    }

    pub async fn orders(&self) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .store
            .orders
            .snapshot()
            .await?
            .into_iter()
            .map(|(_, order)| order)
            .collect();
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }

    pub async fn log_entry(&self, tx: TxId) -> Result<Option<LogEntry>, StoreError> {
        self.store.log.get(tx).await
    }

    async fn finalize(&self, tx: TxId, target: TxStatus) -> Result<(), ParticipantError> {
        let Some(mut entry) = open_transition(Self::NAME, &self.store.log, tx, target).await?
        else {
            return Ok(());
        };

        let mut order = self
            .store
            .orders
            .lock(&tx)
            .await?
            .ok_or(ParticipantError::Corrupted(tx))?;

        if order.status != OrderStatus::Pending {
            return Err(ParticipantError::Corrupted(tx));
        }
        order.status = match target {
            TxStatus::Commit => OrderStatus::Committed,
            _ => OrderStatus::Aborted,
        };
        order.updated_at = Utc::now();

        entry.mark(target);
        order.commit();
        entry.commit();

        info!(participant = Self::NAME, tx = %tx, "{target} applied");
        Ok(())
    }
}

#[async_trait]
impl Participant for OrderParticipant {
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

        // The log entry claims the transaction ID first, so a tombstoned or
        // reused ID never produces an order row. It stays locked until the
        // order row exists.
        let mut entry = log_prepared(&self.store.log, req)?;

        if let Err(e) = self.store.orders.insert(req.tx_id, Order::pending(req)) {
            entry.mark(TxStatus::Abort);
            entry.commit();
            return Err(e.into());
        }
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
