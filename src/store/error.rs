//! Error types for the ledger store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table}: row {key} already exists")]
    Duplicate { table: &'static str, key: String },

    #[error("{table}: row {key} is locked")]
    Contended { table: &'static str, key: String },

    #[error("{0}: table index poisoned by a panicked writer")]
    Poisoned(&'static str),
}
