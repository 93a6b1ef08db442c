//! Remote participant transport.
//!
//! The coordinator only ever sees [`Participant`](crate::participant::Participant),
//! so a participant living in another process is just another implementation
//! of it: [`http::RemoteParticipant`]. The other end is [`http::router`].

use serde::{Deserialize, Serialize};

use crate::model::TxId;

pub mod http;

pub const PREPARE_PATH: &str = "/prepare";
pub const COMMIT_PATH: &str = "/commit";
pub const ABORT_PATH: &str = "/abort";

/// Body of a remote commit or abort call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    #[serde(rename = "transaction_id")]
    pub tx_id: TxId,
}

/// Success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Failure body; the message is human readable only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_request_wire_shape() {
        let tx = TxId::new();
        let json = serde_json::to_value(FinalizeRequest { tx_id: tx }).unwrap();
        assert_eq!(json, serde_json::json!({ "transaction_id": tx.to_string() }));
    }

    #[test]
    fn error_response_parses() {
        let body: ErrorResponse = serde_json::from_str(r#"{"error":"insufficient funds"}"#).unwrap();
        assert_eq!(body.error, "insufficient funds");
    }
}
