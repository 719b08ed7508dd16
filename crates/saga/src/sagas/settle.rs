//! SettleSpin saga: pays out the result of a round.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Balance, Money, Round, Session, Spin, SpinType, WagerSplit, split_win};
use ledger::LedgerStore;

use super::{PublishEventStep, SETTLE_SPIN, SagaDependencies, flags};
use crate::context::{SagaContext, SagaData, required};
use crate::error::{Result, SagaError};
use crate::events::{SpinEvent, SpinEventData};
use crate::orchestrator::SagaDefinition;
use crate::retry::RetryPolicy;
use crate::services::WalletService;
use crate::step::{SagaStep, StepKind};

#[derive(Debug, Clone)]
pub struct SettleSpinContext {
    pub saga: SagaContext,
    pub session: Session,
    pub ext_round_id: String,
    pub win_amount: Money,
    pub free_spin_id: Option<String>,
    pub round: Option<Round>,
    pub place_spin: Option<Spin>,
    /// SETTLE spin stored for this transaction by an earlier run.
    pub replayed_spin: Option<Spin>,
    pub split: Option<WagerSplit>,
    /// Balance after the credit; absent for free spins.
    pub balance: Option<Balance>,
    pub spin: Option<Spin>,
}

impl SettleSpinContext {
    pub fn new(
        saga: SagaContext,
        session: Session,
        ext_round_id: impl Into<String>,
        win_amount: Money,
        free_spin_id: Option<String>,
    ) -> Self {
        Self {
            saga,
            session,
            ext_round_id: ext_round_id.into(),
            win_amount,
            free_spin_id,
            round: None,
            place_spin: None,
            replayed_spin: None,
            split: None,
            balance: None,
            spin: None,
        }
    }

    pub fn transaction_id(&self) -> &str {
        self.saga.correlation_id()
    }

    /// True when either the request or the settled bet belongs to a free spin.
    pub fn is_free_spin(&self) -> bool {
        self.free_spin_id.is_some() || self.place_spin.as_ref().is_some_and(Spin::is_free_spin)
    }
}

impl SagaData for SettleSpinContext {
    fn saga(&self) -> &SagaContext {
        &self.saga
    }

    fn saga_mut(&mut self) -> &mut SagaContext {
        &mut self.saga
    }
}

/// Builds the SettleSpin saga.
pub fn definition(
    deps: &SagaDependencies,
    retry_policy: RetryPolicy,
) -> SagaDefinition<SettleSpinContext> {
    SagaDefinition::new(SETTLE_SPIN)
        .retry_policy(retry_policy)
        .step(FindRound {
            ledger: deps.ledger.clone(),
        })
        .step(FindPlaceSpin {
            ledger: deps.ledger.clone(),
        })
        .step(ComputeWinSplit)
        .step(CreditWallet {
            wallet: deps.wallet.clone(),
        })
        .step(PersistSettleSpin {
            ledger: deps.ledger.clone(),
        })
        .step(PublishEventStep::new(
            "publish_spin_settled",
            deps,
            settled_event,
        ))
}

struct FindRound {
    ledger: Arc<dyn LedgerStore>,
}

#[async_trait]
impl SagaStep<SettleSpinContext> for FindRound {
    fn step_id(&self) -> &str {
        "find_round"
    }

    fn step_name(&self) -> &str {
        "Find round"
    }

    fn kind(&self) -> StepKind {
        StepKind::Validation
    }

    async fn execute(&self, ctx: &mut SettleSpinContext) -> Result<()> {
        let round = self
            .ledger
            .find_round_by_ext_id(ctx.session.id, &ctx.ext_round_id)
            .await?
            .ok_or_else(|| SagaError::RoundNotFound {
                session_id: ctx.session.id,
                ext_round_id: ctx.ext_round_id.clone(),
            })?;
        ctx.round = Some(round);
        Ok(())
    }
}

/// Loads the PLACE spin and any SETTLE already stored for this transaction.
struct FindPlaceSpin {
    ledger: Arc<dyn LedgerStore>,
}

#[async_trait]
impl SagaStep<SettleSpinContext> for FindPlaceSpin {
    fn step_id(&self) -> &str {
        "find_place_spin"
    }

    fn step_name(&self) -> &str {
        "Find PLACE spin"
    }

    fn kind(&self) -> StepKind {
        StepKind::Validation
    }

    async fn execute(&self, ctx: &mut SettleSpinContext) -> Result<()> {
        let round = required(&ctx.round, "round")?;
        let spins = self.ledger.find_spins_by_round_id(round.id).await?;

        let place = spins
            .iter()
            .find(|s| s.spin_type == SpinType::Place)
            .cloned()
            .ok_or_else(|| {
                SagaError::RoundFinished(format!("round {} has no PLACE spin", round.ext_round_id))
            })?;

        ctx.replayed_spin = spins
            .into_iter()
            .find(|s| s.spin_type == SpinType::Settle && s.transaction_id == ctx.transaction_id());
        ctx.place_spin = Some(place);
        Ok(())
    }
}

struct ComputeWinSplit;

#[async_trait]
impl SagaStep<SettleSpinContext> for ComputeWinSplit {
    fn step_id(&self) -> &str {
        "compute_win_split"
    }

    fn step_name(&self) -> &str {
        "Compute win split"
    }

    fn kind(&self) -> StepKind {
        StepKind::Validation
    }

    async fn execute(&self, ctx: &mut SettleSpinContext) -> Result<()> {
        if ctx.win_amount.is_negative() {
            return Err(domain::DomainError::NegativeAmount(ctx.win_amount).into());
        }
        let place = required(&ctx.place_spin, "PLACE spin")?;
        let split = if ctx.free_spin_id.is_some() {
            WagerSplit::all_real(ctx.win_amount)
        } else {
            split_win(ctx.win_amount, place)
        };
        ctx.split = Some(split);
        Ok(())
    }
}

/// Deposits the win. Compensation withdraws it again under the compensation key.
struct CreditWallet {
    wallet: Arc<dyn WalletService>,
}

#[async_trait]
impl SagaStep<SettleSpinContext> for CreditWallet {
    fn step_id(&self) -> &str {
        "credit_wallet"
    }

    fn step_name(&self) -> &str {
        "Credit wallet"
    }

    fn kind(&self) -> StepKind {
        StepKind::Transactional
    }

    async fn execute(&self, ctx: &mut SettleSpinContext) -> Result<()> {
        if ctx.is_free_spin() {
            tracing::debug!("free spin, wallet credit handled outside the saga");
            return Ok(());
        }
        let split = *required(&ctx.split, "win split")?;
        if split.is_zero() {
            return Ok(());
        }

        let player_id = ctx.session.player_id;
        let key = ctx.saga.saga_id().transaction_key();
        let balance = match self
            .wallet
            .deposit(player_id, &key, &ctx.session.currency, split.real, split.bonus)
            .await
        {
            Ok(balance) => balance,
            Err(SagaError::DuplicateTransaction(_)) => {
                tracing::info!(saga_id = %ctx.saga.saga_id(), "wallet credit already applied");
                self.wallet.find_balance(player_id).await?
            }
            Err(e) => return Err(e),
        };

        ctx.saga.set_flag(flags::CREDIT_APPLIED);
        ctx.balance = Some(balance);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SettleSpinContext) -> Result<()> {
        if !ctx.saga.flag(flags::CREDIT_APPLIED) {
            return Ok(());
        }
        let split = *required(&ctx.split, "win split")?;
        let key = ctx.saga.saga_id().compensation_key();
        match self
            .wallet
            .withdraw(
                ctx.session.player_id,
                &key,
                &ctx.session.currency,
                split.real,
                split.bonus,
            )
            .await
        {
            Ok(_) | Err(SagaError::DuplicateTransaction(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Appends the SETTLE spin. Compensation appends a ROLLBACK audit row.
struct PersistSettleSpin {
    ledger: Arc<dyn LedgerStore>,
}

#[async_trait]
impl SagaStep<SettleSpinContext> for PersistSettleSpin {
    fn step_id(&self) -> &str {
        "persist_settle_spin"
    }

    fn step_name(&self) -> &str {
        "Persist SETTLE spin"
    }

    fn kind(&self) -> StepKind {
        StepKind::Transactional
    }

    async fn execute(&self, ctx: &mut SettleSpinContext) -> Result<()> {
        if let Some(existing) = &ctx.replayed_spin {
            ctx.spin = Some(existing.clone());
            return Ok(());
        }
        let place = required(&ctx.place_spin, "PLACE spin")?;
        let split = *required(&ctx.split, "win split")?;

        let spin = Spin::settle(place, ctx.transaction_id(), ctx.win_amount, split)?;
        let saved = self.ledger.save_spin(spin).await?;

        tracing::info!(spin_id = %saved.id, round_id = %saved.round_id, "SETTLE spin recorded");
        ctx.spin = Some(saved);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SettleSpinContext) -> Result<()> {
        if ctx.replayed_spin.is_some() {
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

fn settled_event(ctx: &SettleSpinContext) -> Result<Option<SpinEvent>> {
    if ctx.replayed_spin.is_some() {
        return Ok(None);
    }
    let spin = required(&ctx.spin, "SETTLE spin")?;
    Ok(Some(SpinEvent::Settled(SpinEventData::new(
        ctx.saga.saga_id(),
        &ctx.session,
        &ctx.ext_round_id,
        spin,
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sagas::testing::Fixture;
    use common::SagaId;

    fn context(fixture: &Fixture, win: i64, place: Spin) -> SettleSpinContext {
        let mut ctx = SettleSpinContext::new(
            SagaContext::new(SagaId::new(), "tx-settle"),
            fixture.session.clone(),
            "round-1",
            Money::from_minor(win),
            None,
        );
        ctx.place_spin = Some(place);
        ctx
    }

    fn place(real: i64, bonus: i64) -> Spin {
        Spin::place(
            common::RoundId::new(),
            "tx-place",
            Money::from_minor(real + bonus),
            WagerSplit::new(Money::from_minor(real), Money::from_minor(bonus)),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_win_follows_bonus_usage_of_bet() {
        let fixture = Fixture::new(0, 0).await;

        let mut bonus_bet = context(&fixture, 100, place(0, 10));
        ComputeWinSplit.execute(&mut bonus_bet).await.unwrap();
        assert_eq!(bonus_bet.split, Some(WagerSplit::all_bonus(Money::from_minor(100))));

        let mut real_bet = context(&fixture, 100, place(10, 0));
        ComputeWinSplit.execute(&mut real_bet).await.unwrap();
        assert_eq!(real_bet.split, Some(WagerSplit::all_real(Money::from_minor(100))));
    }

    #[tokio::test]
    async fn test_credit_compensation_takes_the_win_back() {
        let fixture = Fixture::new(50, 0).await;
        let step = CreditWallet {
            wallet: fixture.deps.wallet.clone(),
        };
        let mut ctx = context(&fixture, 30, place(10, 0));
        ctx.split = Some(WagerSplit::all_real(Money::from_minor(30)));

        step.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.balance, Some(fixture.balance(80, 0)));

        step.compensate(&mut ctx).await.unwrap();
        assert_eq!(
            fixture.wallet.balance(fixture.session.player_id).await,
            Some(fixture.balance(50, 0))
        );
    }

    #[tokio::test]
    async fn test_credit_compensation_without_credit_is_a_no_op() {
        let fixture = Fixture::new(50, 0).await;
        let step = CreditWallet {
            wallet: fixture.deps.wallet.clone(),
        };
        let mut ctx = context(&fixture, 30, place(10, 0));
        ctx.split = Some(WagerSplit::all_real(Money::from_minor(30)));

        step.compensate(&mut ctx).await.unwrap();
        assert_eq!(fixture.wallet.total_calls().await, 0);
    }
}
