pub mod amount;
pub mod config;
pub mod coordinator;
pub mod csv;
pub mod log;
pub mod model;
pub mod participant;
pub mod service;
pub mod store;
pub mod transport;

pub use amount::Amount;
pub use coordinator::{Coordinator, CoordinatorError};
pub use model::{Decision, OrderRequest, TxId, UserId};
pub use participant::{Participant, ParticipantError, PrepareRequest, Reservation, TxContext};
pub use service::Ledger;
