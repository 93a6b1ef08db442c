//! HTTP binding for participants: a `reqwest` client and an `axum` router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Client;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use super::{ABORT_PATH, COMMIT_PATH, ErrorResponse, FinalizeRequest, PREPARE_PATH, StatusResponse};
use crate::config::Config;
use crate::model::TxId;
use crate::participant::{
    ErrorKind, Participant, ParticipantError, PrepareRequest, Reservation, TxContext,
};

/// A participant reached over HTTP.
///
/// `base_url` is the prefix the operation paths are appended to, e.g.
/// `http://customer:8081/customer`.
pub struct RemoteParticipant {
    name: String,
    base_url: String,
    client: Client,
}

impl RemoteParticipant {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        config: &Config,
    ) -> Result<Self, ParticipantError> {
        let base_url: String = base_url.into();
        reqwest::Url::parse(&base_url)
            .map_err(|e| ParticipantError::Transport(format!("invalid url '{base_url}': {e}")))?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ParticipantError::Transport(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        tx: TxId,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<(), ParticipantError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ParticipantError::Cancelled(tx)
            } else {
                ParticipantError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(participant = %self.name, tx = %tx, url = %url, "remote call succeeded");
            return Ok(());
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        Err(ParticipantError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Participant for RemoteParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(
        &self,
        ctx: &TxContext,
        req: &PrepareRequest,
    ) -> Result<Reservation, ParticipantError> {
        if ctx.is_expired() {
            return Err(ParticipantError::Cancelled(req.tx_id));
        }
        self.post(PREPARE_PATH, req.tx_id, req, ctx.remaining()).await?;
        Ok(Reservation::from(req))
    }

    async fn commit(&self, tx: TxId) -> Result<(), ParticipantError> {
        self.post(COMMIT_PATH, tx, &FinalizeRequest { tx_id: tx }, None)
            .await
    }

    async fn abort(&self, tx: TxId) -> Result<(), ParticipantError> {
        self.post(ABORT_PATH, tx, &FinalizeRequest { tx_id: tx }, None)
            .await
    }
}

type SharedParticipant = Arc<dyn Participant>;

/// Routes exposing `participant` as `/prepare`, `/commit` and `/abort`.
///
/// Nest it to get per-participant prefixes, e.g.
/// `Router::new().nest("/customer", router(customer))`.
pub fn router(participant: SharedParticipant) -> Router {
    Router::new()
        .route(PREPARE_PATH, post(handle_prepare))
        .route(COMMIT_PATH, post(handle_commit))
        .route(ABORT_PATH, post(handle_abort))
        .with_state(participant)
}

/// Serve `router(participant)` until the listener fails.
pub async fn serve(listener: TcpListener, participant: SharedParticipant) -> std::io::Result<()> {
    axum::serve(listener, router(participant)).await
}

/// A participant error rendered as an HTTP failure.
struct ApiError(ParticipantError);

impl From<ParticipantError> for ApiError {
    fn from(value: ParticipantError) -> Self {
        ApiError(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InsufficientResource => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::StoreFailure => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn handle_prepare(
    State(participant): State<SharedParticipant>,
    Json(req): Json<PrepareRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    // the caller enforces the deadline through its request timeout
    participant
        .prepare(&TxContext::unbounded(), &req)
        .await
        .inspect_err(|e| {
            warn!(
                participant = participant.name(),
                tx = %req.tx_id,
                reason = %e,
                "prepare refused"
            )
        })?;
    Ok(Json(StatusResponse::new("prepared")))
}

async fn handle_commit(
    State(participant): State<SharedParticipant>,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    participant.commit(req.tx_id).await?;
    Ok(Json(StatusResponse::new("committed")))
}

async fn handle_abort(
    State(participant): State<SharedParticipant>,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    participant.abort(req.tx_id).await?;
    Ok(Json(StatusResponse::new("aborted")))
}
