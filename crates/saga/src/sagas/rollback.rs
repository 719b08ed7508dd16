//! RollbackSpin saga: refunds a bet and records the ROLLBACK row.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Balance, Round, Session, Spin, SpinType, WagerSplit};
use ledger::{LedgerStore, LedgerStoreExt};

use super::{PublishEventStep, ROLLBACK_SPIN, SagaDependencies, flags};
use crate::context::{SagaContext, SagaData, required};
use crate::error::{Result, SagaError};
use crate::events::{SpinEvent, SpinEventData};
use crate::orchestrator::SagaDefinition;
use crate::retry::RetryPolicy;
use crate::services::WalletService;
use crate::step::{SagaStep, StepKind};

#[derive(Debug, Clone)]
pub struct RollbackSpinContext {
    pub saga: SagaContext,
    pub session: Session,
    pub ext_round_id: String,
    pub round: Option<Round>,
    pub place_spin: Option<Spin>,
    /// ROLLBACK already referencing the PLACE spin, from this or an earlier request.
    pub existing_rollback: Option<Spin>,
    /// Balance after the refund; absent when nothing was refunded.
    pub balance: Option<Balance>,
    pub spin: Option<Spin>,
}

impl RollbackSpinContext {
    pub fn new(saga: SagaContext, session: Session, ext_round_id: impl Into<String>) -> Self {
        Self {
            saga,
            session,
            ext_round_id: ext_round_id.into(),
            round: None,
            place_spin: None,
            existing_rollback: None,
            balance: None,
            spin: None,
        }
    }

    pub fn transaction_id(&self) -> &str {
        self.saga.correlation_id()
    }

    /// The amounts to give back, or `None` when no refund is due.
    fn refund(&self) -> Option<WagerSplit> {
        if self.existing_rollback.is_some() {
            return None;
        }
        let place = self.place_spin.as_ref()?;
        if place.is_free_spin() {
            return None;
        }
        let split = place.split();
        (!split.is_zero()).then_some(split)
    }
}

impl SagaData for RollbackSpinContext {
    fn saga(&self) -> &SagaContext {
        &self.saga
    }

    fn saga_mut(&mut self) -> &mut SagaContext {
        &mut self.saga
    }
}

/// Builds the RollbackSpin saga.
pub fn definition(
    deps: &SagaDependencies,
    retry_policy: RetryPolicy,
) -> SagaDefinition<RollbackSpinContext> {
    SagaDefinition::new(ROLLBACK_SPIN)
        .retry_policy(retry_policy)
        .step(LocateRoundAndPlaceSpin {
            ledger: deps.ledger.clone(),
        })
        .step(RefundWallet {
            wallet: deps.wallet.clone(),
        })
        .step(PersistRollbackSpin {
            ledger: deps.ledger.clone(),
        })
        .step(PublishEventStep::new(
            "publish_spin_rolled_back",
            deps,
            rolled_back_event,
        ))
}

/// Single combined lookup of the round and its PLACE spin.
struct LocateRoundAndPlaceSpin {
    ledger: Arc<dyn LedgerStore>,
}

#[async_trait]
impl SagaStep<RollbackSpinContext> for LocateRoundAndPlaceSpin {
    fn step_id(&self) -> &str {
        "locate_round_and_place_spin"
    }

    fn step_name(&self) -> &str {
        "Locate round and PLACE spin"
    }

    fn kind(&self) -> StepKind {
        StepKind::Validation
    }

    async fn execute(&self, ctx: &mut RollbackSpinContext) -> Result<()> {
        let (round, place) = self
            .ledger
            .find_round_with_place_spin(ctx.session.id, &ctx.ext_round_id)
            .await?
            .ok_or_else(|| SagaError::RoundNotFound {
                session_id: ctx.session.id,
                ext_round_id: ctx.ext_round_id.clone(),
            })?;
        let place = place.ok_or_else(|| {
            SagaError::RoundFinished(format!("round {} has no PLACE spin", round.ext_round_id))
        })?;

        let existing = self
            .ledger
            .find_spin_referencing(round.id, place.id, SpinType::Rollback)
            .await?;
        if let Some(existing) = &existing {
            tracing::info!(
                place_spin_id = %place.id,
                rollback_spin_id = %existing.id,
                "PLACE spin already rolled back"
            );
        }

        ctx.existing_rollback = existing;
        ctx.round = Some(round);
        ctx.place_spin = Some(place);
        Ok(())
    }
}

/// Gives the bet back. Compensation re-applies the original debit.
struct RefundWallet {
    wallet: Arc<dyn WalletService>,
}

#[async_trait]
impl SagaStep<RollbackSpinContext> for RefundWallet {
    fn step_id(&self) -> &str {
        "refund_wallet"
    }

    fn step_name(&self) -> &str {
        "Refund wallet"
    }

    fn kind(&self) -> StepKind {
        StepKind::Transactional
    }

    async fn execute(&self, ctx: &mut RollbackSpinContext) -> Result<()> {
        let Some(refund) = ctx.refund() else {
            return Ok(());
        };

        let player_id = ctx.session.player_id;
        let key = ctx.saga.saga_id().transaction_key();
        let balance = match self
            .wallet
            .deposit(player_id, &key, &ctx.session.currency, refund.real, refund.bonus)
            .await
        {
            Ok(balance) => balance,
            Err(SagaError::DuplicateTransaction(_)) => self.wallet.find_balance(player_id).await?,
            Err(e) => return Err(e),
        };

        ctx.saga.set_flag(flags::REFUND_APPLIED);
        ctx.balance = Some(balance);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut RollbackSpinContext) -> Result<()> {
        if !ctx.saga.flag(flags::REFUND_APPLIED) {
            return Ok(());
        }
        let Some(refund) = ctx.refund() else {
            return Ok(());
        };
        let key = ctx.saga.saga_id().compensation_key();
        match self
            .wallet
            .withdraw(
                ctx.session.player_id,
                &key,
                &ctx.session.currency,
                refund.real,
                refund.bonus,
            )
            .await
        {
            Ok(_) | Err(SagaError::DuplicateTransaction(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Appends the ROLLBACK spin. Compensation voids it with another audit row.
struct PersistRollbackSpin {
    ledger: Arc<dyn LedgerStore>,
}

#[async_trait]
impl SagaStep<RollbackSpinContext> for PersistRollbackSpin {
    fn step_id(&self) -> &str {
        "persist_rollback_spin"
    }

    fn step_name(&self) -> &str {
        "Persist ROLLBACK spin"
    }

    fn kind(&self) -> StepKind {
        StepKind::Transactional
    }

    async fn execute(&self, ctx: &mut RollbackSpinContext) -> Result<()> {
        if let Some(existing) = &ctx.existing_rollback {
            ctx.spin = Some(existing.clone());
            return Ok(());
        }
        let place = required(&ctx.place_spin, "PLACE spin")?;
        let saved = self
            .ledger
            .save_spin(Spin::rollback(place, ctx.transaction_id()))
            .await?;

        tracing::info!(spin_id = %saved.id, place_spin_id = %place.id, "ROLLBACK spin recorded");
        ctx.spin = Some(saved);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut RollbackSpinContext) -> Result<()> {
        if ctx.existing_rollback.is_some() {
            return Ok(());
        }
        let Some(spin) = &ctx.spin else {
            return Ok(());
        };
        let audit = Spin::rollback(spin, ctx.saga.saga_id().compensation_key());
        self.ledger.save_spin(audit).await?;
        Ok(())
    }
}

fn rolled_back_event(ctx: &RollbackSpinContext) -> Result<Option<SpinEvent>> {
    if ctx.existing_rollback.is_some() {
        return Ok(None);
    }
    let spin = required(&ctx.spin, "ROLLBACK spin")?;
    Ok(Some(SpinEvent::RolledBack(SpinEventData::new(
        ctx.saga.saga_id(),
        &ctx.session,
        &ctx.ext_round_id,
        spin,
    ))))
}
