//! Two-phase commit coordinator.
//!
//! The coordinator owns no durable state. For each transaction it fans
//! prepare out to every participant concurrently, waits for all votes (or the
//! deadline), decides, and then asks every participant to commit or abort.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::model::{Decision, OrderRequest, TxId};
use crate::participant::{
    ErrorKind, Participant, ParticipantError, PrepareRequest, Reservation, TxContext,
};

mod error;
pub use error::CoordinatorError;

/// One participant's answer to prepare.
type Vote = Result<Reservation, ParticipantError>;

pub struct Coordinator {
    participants: Vec<Arc<dyn Participant>>,
    config: Config,
}

/// Public API
impl Coordinator {
    pub fn new(config: Config) -> Self {
        Self {
            participants: Vec::new(),
            config,
        }
    }

    /// Register a participant. Prepare errors are reported in registration order.
    pub fn with_participant(mut self, participant: Arc<dyn Participant>) -> Self {
        self.participants.push(participant);
        self
    }

    pub fn participants(&self) -> impl Iterator<Item = &str> + '_ {
        self.participants.iter().map(|p| p.name())
    }

    /// Run one transaction with the configured prepare timeout.
    pub async fn run(&self, request: OrderRequest) -> Result<TxId, CoordinatorError> {
        let deadline = Instant::now() + self.config.prepare_timeout;
        self.run_with_deadline(request, deadline).await
    }

    /// Run one transaction whose prepare phase must finish by `deadline`.
    pub async fn run_with_deadline(
        &self,
        request: OrderRequest,
        deadline: Instant,
    ) -> Result<TxId, CoordinatorError> {
        if request.amount.is_zero() {
            return Err(CoordinatorError::InvalidAmount);
        }
        if self.participants.is_empty() {
            return Err(CoordinatorError::NoParticipants);
        }

        let req = PrepareRequest {
            tx_id: TxId::new(),
            user_id: request.user_id,
            amount: request.amount,
        };
        let tx_id = req.tx_id;
        let ctx = TxContext::with_deadline(deadline);

        let votes = self.prepare(&ctx, &req).await;

        // any no vote, including a missed deadline, aborts everyone
        let first_failure = votes
            .into_iter()
            .find_map(|(participant, vote)| vote.err().map(|e| (participant, e)));

        if let Some((participant, source)) = first_failure {
            self.finalize(tx_id, Decision::Abort).await;
            warn!(
                tx = %tx_id,
                user = %req.user_id,
                amount = %req.amount,
                participant = %participant,
                reason = %source,
                "transaction aborted"
            );
            return Err(CoordinatorError::Prepare {
                tx_id,
                participant,
                source,
            });
        }

        let failures = self.finalize(tx_id, Decision::Commit).await;
        if let Some((participant, source)) = failures.into_iter().next() {
            self.compensate(tx_id).await;
            return Err(CoordinatorError::CommitIncomplete {
                tx_id,
                participant,
                source,
            });
        }

        info!(
            tx = %tx_id,
            user = %req.user_id,
            amount = %req.amount,
            "transaction committed"
        );
        Ok(tx_id)
    }
}

/// Private API
impl Coordinator {
    /// Ask every participant to prepare, concurrently, and wait for all of them.
    ///
    /// Branches still running at the deadline are dropped and vote `Cancelled`.
    /// Votes come back in registration order.
    async fn prepare(&self, ctx: &TxContext, req: &PrepareRequest) -> Vec<(String, Vote)> {
        let mut branches = JoinSet::new();
        for (idx, participant) in self.participants.iter().enumerate() {
            let participant = Arc::clone(participant);
            let req = req.clone();
            let ctx = *ctx;
            branches.spawn(async move {
                let vote = match ctx.deadline() {
                    Some(deadline) => timeout_at(deadline, participant.prepare(&ctx, &req))
                        .await
                        .unwrap_or_else(|_elapsed| Err(ParticipantError::Cancelled(req.tx_id))),
                    None => participant.prepare(&ctx, &req).await,
                };
                (idx, vote)
            });
        }

        let mut votes: Vec<Option<Vote>> = self.participants.iter().map(|_| None).collect();
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok((idx, vote)) => votes[idx] = Some(vote),
                Err(e) => error!(tx = %req.tx_id, reason = %e, "prepare branch failed"),
            }
        }

        self.participants
            .iter()
            .zip(votes)
            .map(|(participant, vote)| {
                let vote = vote.unwrap_or_else(|| {
                    Err(ParticipantError::TaskFailed(format!(
                        "prepare on {} did not report",
                        participant.name()
                    )))
                });
                match &vote {
                    Ok(_) => debug!(tx = %req.tx_id, participant = participant.name(), "voted yes"),
                    Err(e) => debug!(
                        tx = %req.tx_id,
                        participant = participant.name(),
                        reason = %e,
                        "voted no"
                    ),
                }
                (participant.name().to_string(), vote)
            })
            .collect()
    }

    /// Deliver the decision to every participant, in registration order.
    ///
    /// Failures are not retried; they are logged and returned.
    async fn finalize(&self, tx: TxId, decision: Decision) -> Vec<(String, ParticipantError)> {
        let mut failures = Vec::new();
        for participant in &self.participants {
            let result = match decision {
                Decision::Commit => participant.commit(tx).await,
                Decision::Abort => participant.abort(tx).await,
            };
            if let Err(e) = result {
                error!(
                    tx = %tx,
                    participant = participant.name(),
                    decision = %decision,
                    reason = %e,
                    "finalize failed, participant may be inconsistent"
                );
                failures.push((participant.name().to_string(), e));
            }
        }
        failures
    }

    /// Best-effort abort after a partially applied commit.
    ///
    /// Participants that already committed refuse it, which is expected.
    async fn compensate(&self, tx: TxId) {
        for participant in &self.participants {
            match participant.abort(tx).await {
                Ok(()) => {
                    warn!(tx = %tx, participant = participant.name(), "compensating abort applied");
                }
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    debug!(
                        tx = %tx,
                        participant = participant.name(),
                        reason = %e,
                        "compensating abort refused"
                    );
                }
                Err(e) => {
                    error!(
                        tx = %tx,
                        participant = participant.name(),
                        reason = %e,
                        "compensating abort failed"
                    );
                }
            }
        }
    }
}
