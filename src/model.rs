//! Core domain types shared by the coordinator and its participants.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Amount;

/// Customer (subject) identifier.
pub type UserId = String;

/// Globally unique transaction identifier, generated once by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(Uuid);

impl TxId {
    pub fn new() -> Self {
        TxId(Uuid::new_v4())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A client request to place an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub amount: Amount,
}

impl OrderRequest {
    pub fn new(user_id: impl Into<UserId>, amount: Amount) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
        }
    }
}

/// Global outcome of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Commit,
    Abort,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Commit => f.write_str("commit"),
            Decision::Abort => f.write_str("abort"),
        }
    }
}
