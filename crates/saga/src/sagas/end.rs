//! EndSpin saga: closes a round.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{Round, Session};
use ledger::LedgerStore;

use super::{END_SPIN, PublishEventStep, SagaDependencies};
use crate::context::{SagaContext, SagaData, required};
use crate::error::{Result, SagaError};
use crate::events::{RoundEndedData, SpinEvent};
use crate::orchestrator::SagaDefinition;
use crate::retry::RetryPolicy;
use crate::step::{SagaStep, StepKind};

#[derive(Debug, Clone)]
pub struct EndSpinContext {
    pub saga: SagaContext,
    pub session: Session,
    pub ext_round_id: String,
    pub round: Option<Round>,
    /// The round was finished before this request.
    pub already_finished: bool,
}

impl EndSpinContext {
    pub fn new(saga: SagaContext, session: Session, ext_round_id: impl Into<String>) -> Self {
        Self {
            saga,
            session,
            ext_round_id: ext_round_id.into(),
            round: None,
            already_finished: false,
        }
    }
}

impl SagaData for EndSpinContext {
    fn saga(&self) -> &SagaContext {
        &self.saga
    }

    fn saga_mut(&mut self) -> &mut SagaContext {
        &mut self.saga
    }
}

/// Builds the EndSpin saga.
pub fn definition(
    deps: &SagaDependencies,
    retry_policy: RetryPolicy,
) -> SagaDefinition<EndSpinContext> {
    SagaDefinition::new(END_SPIN)
        .retry_policy(retry_policy)
        .step(FindRound {
            ledger: deps.ledger.clone(),
        })
        .step(FinishRound {
            ledger: deps.ledger.clone(),
        })
        .step(PublishEventStep::new("publish_round_ended", deps, ended_event))
}

struct FindRound {
    ledger: Arc<dyn LedgerStore>,
}

#[async_trait]
impl SagaStep<EndSpinContext> for FindRound {
    fn step_id(&self) -> &str {
        "find_round"
    }

    fn step_name(&self) -> &str {
        "Find round"
    }

    fn kind(&self) -> StepKind {
        StepKind::Validation
    }

    async fn execute(&self, ctx: &mut EndSpinContext) -> Result<()> {
        let round = self
            .ledger
            .find_round_by_ext_id(ctx.session.id, &ctx.ext_round_id)
            .await?
            .ok_or_else(|| SagaError::RoundNotFound {
                session_id: ctx.session.id,
                ext_round_id: ctx.ext_round_id.clone(),
            })?;
        ctx.already_finished = round.finished;
        ctx.round = Some(round);
        Ok(())
    }
}

/// Marks the round finished. A finished round is never reopened, so there is
/// nothing to compensate.
struct FinishRound {
    ledger: Arc<dyn LedgerStore>,
}

#[async_trait]
impl SagaStep<EndSpinContext> for FinishRound {
    fn step_id(&self) -> &str {
        "finish_round"
    }

    fn step_name(&self) -> &str {
        "Finish round"
    }

    fn kind(&self) -> StepKind {
        StepKind::Transactional
    }

    fn requires_compensation(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut EndSpinContext) -> Result<()> {
        let round_id = required(&ctx.round, "round")?.id;
        let round = self.ledger.finish_round(round_id, Utc::now()).await?;
        tracing::info!(%round_id, finished_at = ?round.finished_at, "round finished");
        ctx.round = Some(round);
        Ok(())
    }
}

fn ended_event(ctx: &EndSpinContext) -> Result<Option<SpinEvent>> {
    if ctx.already_finished {
        return Ok(None);
    }
    let round = required(&ctx.round, "round")?;
    Ok(Some(SpinEvent::Ended(RoundEndedData::new(
        ctx.saga.saga_id(),
        &ctx.session,
        round,
    ))))
}
