//! In-process order ledger.
//!
//! Wires a customer participant and an order participant, each over its own
//! store, behind one coordinator. This is the boundary a thin API layer calls.
//! It also consumes an async stream of commands.

use std::sync::Arc;

use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorError};
use crate::model::{OrderRequest, TxId, UserId};
use crate::participant::customer::{CustomerParticipant, CustomerStore};
use crate::participant::order::{OrderParticipant, OrderStore};
use crate::store::StoreError;

/// Inputs accepted by [`Ledger::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register a customer with an opening balance.
    CreateCustomer { user_id: UserId, balance: Amount },
    /// Place an order debiting the customer.
    SubmitOrder { user_id: UserId, amount: Amount },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("customer setup failed: {0}")]
    Setup(#[from] StoreError),

    #[error("order failed: {0}")]
    Order(#[from] CoordinatorError),
}

pub struct Ledger {
    customers: Arc<CustomerParticipant>,
    orders: Arc<OrderParticipant>,
    coordinator: Coordinator,
}

/// Public API
impl Ledger {
    pub fn new(config: Config) -> Self {
        Self::with_stores(
            config,
            Arc::new(CustomerStore::new()),
            Arc::new(OrderStore::new()),
        )
    }

    pub fn with_stores(
        config: Config,
        customer_store: Arc<CustomerStore>,
        order_store: Arc<OrderStore>,
    ) -> Self {
        let customers = Arc::new(CustomerParticipant::new(customer_store));
        let orders = Arc::new(OrderParticipant::new(order_store));
        let coordinator = Coordinator::new(config)
            .with_participant(customers.clone())
            .with_participant(orders.clone());

        Self {
            customers,
            orders,
            coordinator,
        }
    }

    /// Run the ledger over a command stream. Failed commands are logged and skipped.
    pub async fn run(&self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // a failed command never stops the ledger
            let _ = self.apply(command).await;
        }
    }

    pub async fn apply(&self, command: Command) -> Result<(), LedgerError> {
        match command {
            Command::CreateCustomer { user_id, balance } => {
                let result = self.create_customer(user_id.clone(), balance);
                Self::log_result("customer", &user_id, balance, None, &result);
                result?;
            }
            Command::SubmitOrder { user_id, amount } => {
                let result = self.submit_order(user_id.clone(), amount).await;
                let tx = result.as_ref().ok().copied();
                Self::log_result("order", &user_id, amount, tx, &result);
                result?;
            }
        }
        Ok(())
    }

    /// Setup only, not part of two-phase commit.
    pub fn create_customer(&self, user_id: UserId, balance: Amount) -> Result<(), StoreError> {
        self.customers.create(user_id, balance)
    }

    /// The single entry point into the coordinator.
    pub async fn submit_order(
        &self,
        user_id: UserId,
        amount: Amount,
    ) -> Result<TxId, CoordinatorError> {
        self.coordinator
            .run(OrderRequest { user_id, amount })
            .await
    }

    pub fn customers(&self) -> &CustomerParticipant {
        &self.customers
    }

    pub fn orders(&self) -> &OrderParticipant {
        &self.orders
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}

/// Private API
impl Ledger {
    fn log_result<T, E: std::fmt::Display>(
        kind: &str,
        user: &UserId,
        amount: Amount,
        tx: Option<TxId>,
        result: &Result<T, E>,
    ) {
        match (result, tx) {
            (Ok(_), Some(tx)) => {
                info!(user = %user, amount = %amount, tx = %tx, "{kind} applied");
            }
            (Ok(_), None) => {
                info!(user = %user, amount = %amount, "{kind} applied");
            }
            (Err(e), _) => {
                warn!(user = %user, amount = %amount, reason = %e, "{kind} skipped");
            }
        }
    }
}
