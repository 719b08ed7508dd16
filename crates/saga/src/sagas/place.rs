//! PlaceSpin saga: records a bet.
//!
//! Steps: validate game, find or create round, validate balance and bet
//! limit, debit the wallet (optimistic, detached), persist the PLACE spin,
//! publish `SpinPlaced`.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Balance, DomainError, Game, Money, Round, Session, Spin, WagerSplit, split_wager};
use ledger::{LedgerError, LedgerStore};

use super::{PLACE_SPIN, PublishEventStep, SagaDependencies, flags};
use crate::context::{SagaContext, SagaData, required};
use crate::error::{Result, SagaError};
use crate::events::{SpinEvent, SpinEventData};
use crate::orchestrator::SagaDefinition;
use crate::reconciliation::{ReconciliationEntry, ReconciliationQueue};
use crate::retry::RetryPolicy;
use crate::services::{GameCatalog, PlayerService, WalletService};
use crate::step::{SagaStep, StepKind};
use crate::tasks::DetachedTasks;

/// Context of one PlaceSpin execution.
#[derive(Debug, Clone)]
pub struct PlaceSpinContext {
    pub saga: SagaContext,
    pub session: Session,
    pub ext_round_id: String,
    pub amount: Money,
    pub free_spin_id: Option<String>,
    pub game: Option<Game>,
    pub round: Option<Round>,
    /// PLACE spin stored for this transaction by an earlier run.
    pub replayed_spin: Option<Spin>,
    /// Balance reported by the wallet before the debit.
    pub balance: Option<Balance>,
    pub split: Option<WagerSplit>,
    /// Balance expected once the detached debit lands.
    pub predicted_balance: Option<Balance>,
    pub spin: Option<Spin>,
}

impl PlaceSpinContext {
    pub fn new(
        saga: SagaContext,
        session: Session,
        ext_round_id: impl Into<String>,
        amount: Money,
        free_spin_id: Option<String>,
    ) -> Self {
        Self {
            saga,
            session,
            ext_round_id: ext_round_id.into(),
            amount,
            free_spin_id,
            game: None,
            round: None,
            replayed_spin: None,
            balance: None,
            split: None,
            predicted_balance: None,
            spin: None,
        }
    }

    /// The caller's transaction id.
    pub fn transaction_id(&self) -> &str {
        self.saga.correlation_id()
    }

    pub fn is_free_spin(&self) -> bool {
        self.free_spin_id.is_some()
    }
}

impl SagaData for PlaceSpinContext {
    fn saga(&self) -> &SagaContext {
        &self.saga
    }

    fn saga_mut(&mut self) -> &mut SagaContext {
        &mut self.saga
    }
}

/// Builds the PlaceSpin saga.
pub fn definition(
    deps: &SagaDependencies,
    retry_policy: RetryPolicy,
) -> SagaDefinition<PlaceSpinContext> {
    SagaDefinition::new(PLACE_SPIN)
        .retry_policy(retry_policy)
        .step(ValidateGame {
            catalog: deps.catalog.clone(),
        })
        .step(FindOrCreateRound {
            ledger: deps.ledger.clone(),
        })
        .step(ValidateBalance {
            wallet: deps.wallet.clone(),
            players: deps.players.clone(),
        })
        .step(DebitWallet {
            wallet: deps.wallet.clone(),
            tasks: deps.tasks.clone(),
            reconciliation: deps.reconciliation.clone(),
        })
        .step(PersistPlaceSpin {
            ledger: deps.ledger.clone(),
        })
        .step(PublishEventStep::new(
            "publish_spin_placed",
            deps,
            placed_event,
        ))
}

struct ValidateGame {
    catalog: Arc<dyn GameCatalog>,
}

#[async_trait]
impl SagaStep<PlaceSpinContext> for ValidateGame {
    fn step_id(&self) -> &str {
        "validate_game"
    }

    fn step_name(&self) -> &str {
        "Validate game"
    }

    fn kind(&self) -> StepKind {
        StepKind::Validation
    }

    async fn execute(&self, ctx: &mut PlaceSpinContext) -> Result<()> {
        let session = &ctx.session;
        let game = self
            .catalog
            .find_game(&session.aggregator, session.game_id)
            .await?
            .ok_or_else(|| {
                SagaError::GameUnavailable(format!(
                    "game {} is not offered by {}",
                    session.game_id, session.aggregator
                ))
            })?;

        if !game.playable {
            return Err(SagaError::GameUnavailable(format!(
                "game {} is not playable",
                game.name
            )));
        }

        ctx.game = Some(game);
        Ok(())
    }
}

/// Upserts the round. Compensation leaves it in place: an empty round is harmless.
struct FindOrCreateRound {
    ledger: Arc<dyn LedgerStore>,
}

#[async_trait]
impl SagaStep<PlaceSpinContext> for FindOrCreateRound {
    fn step_id(&self) -> &str {
        "find_or_create_round"
    }

    fn step_name(&self) -> &str {
        "Find or create round"
    }

    fn kind(&self) -> StepKind {
        StepKind::Transactional
    }

    async fn execute(&self, ctx: &mut PlaceSpinContext) -> Result<()> {
        let round = self
            .ledger
            .find_or_create_round(ctx.session.id, ctx.session.game_id, &ctx.ext_round_id)
            .await?;

        match self.ledger.find_place_spin_by_round_id(round.id).await? {
            Some(place) if place.transaction_id == ctx.transaction_id() => {
                tracing::info!(round_id = %round.id, spin_id = %place.id, "PLACE spin already recorded");
                ctx.replayed_spin = Some(place);
            }
            Some(place) => {
                return Err(LedgerError::DuplicatePlaceSpin {
                    round_id: round.id,
                    existing_transaction: place.transaction_id,
                }
                .into());
            }
            None if round.finished => {
                return Err(SagaError::RoundFinished(format!(
                    "round {} is already finished",
                    round.ext_round_id
                )));
            }
            None => {}
        }

        ctx.round = Some(round);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut PlaceSpinContext) -> Result<()> {
        if let Some(round) = &ctx.round {
            tracing::debug!(round_id = %round.id, "leaving round in place");
        }
        Ok(())
    }
}

/// Fetches balance and bet limit concurrently and splits the wager.
struct ValidateBalance {
    wallet: Arc<dyn WalletService>,
    players: Arc<dyn PlayerService>,
}

#[async_trait]
impl SagaStep<PlaceSpinContext> for ValidateBalance {
    fn step_id(&self) -> &str {
        "validate_balance"
    }

    fn step_name(&self) -> &str {
        "Validate balance and bet limit"
    }

    fn kind(&self) -> StepKind {
        StepKind::Validation
    }

    async fn execute(&self, ctx: &mut PlaceSpinContext) -> Result<()> {
        if ctx.is_free_spin() {
            tracing::debug!("free spin, skipping balance validation");
            return Ok(());
        }
        if ctx.amount.is_negative() {
            return Err(DomainError::NegativeAmount(ctx.amount).into());
        }

        let player_id = ctx.session.player_id;
        let (balance, limit) = tokio::join!(
            self.wallet.find_balance(player_id),
            self.players.find_current_bet_limit(player_id)
        );
        let balance = balance?;
        let limit = limit?;

        if let Some(replayed) = &ctx.replayed_spin {
            ctx.split = Some(replayed.split());
            ctx.balance = Some(balance);
            return Ok(());
        }

        if ctx.amount > balance.total() {
            return Err(SagaError::InsufficientBalance {
                amount: ctx.amount,
                available: balance.total(),
            });
        }
        if let Some(limit) = limit.filter(|limit| ctx.amount > *limit) {
            return Err(SagaError::BetLimitExceeded {
                amount: ctx.amount,
                limit,
            });
        }

        ctx.split = Some(split_wager(ctx.amount, &balance));
        ctx.balance = Some(balance);
        Ok(())
    }
}

/// Issues the wallet debit on a detached task and records the predicted balance.
///
/// The saga does not wait for the wallet, so this step cannot be compensated;
/// a failed debit is handed to reconciliation instead.
struct DebitWallet {
    wallet: Arc<dyn WalletService>,
    tasks: DetachedTasks,
    reconciliation: ReconciliationQueue,
}

#[async_trait]
impl SagaStep<PlaceSpinContext> for DebitWallet {
    fn step_id(&self) -> &str {
        "debit_wallet"
    }

    fn step_name(&self) -> &str {
        "Debit wallet"
    }

    fn kind(&self) -> StepKind {
        StepKind::Transactional
    }

    fn requires_compensation(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut PlaceSpinContext) -> Result<()> {
        if ctx.is_free_spin() {
            return Ok(());
        }
        let balance = required(&ctx.balance, "balance")?.clone();
        let split = *required(&ctx.split, "wager split")?;

        if ctx.replayed_spin.is_some() {
            ctx.predicted_balance = Some(balance);
            return Ok(());
        }

        ctx.predicted_balance = Some(balance.debited(split.real, split.bonus));
        if split.is_zero() {
            return Ok(());
        }
        ctx.saga.set_flag(flags::DEBIT_ISSUED);

        let wallet = self.wallet.clone();
        let queue = self.reconciliation.clone();
        let saga_id = ctx.saga.saga_id();
        let player_id = ctx.session.player_id;
        let currency = ctx.session.currency.clone();

        self.tasks.spawn("wallet_debit", async move {
            let key = saga_id.transaction_key();
            match wallet
                .withdraw(player_id, &key, &currency, split.real, split.bonus)
                .await
            {
                Ok(_) => {
                    tracing::debug!(%saga_id, "wallet debit applied");
                    Ok(())
                }
                Err(SagaError::DuplicateTransaction(_)) => {
                    tracing::info!(%saga_id, "wallet debit already applied");
                    Ok(())
                }
                Err(error) => {
                    queue
                        .record(ReconciliationEntry::pending_debit(
                            saga_id,
                            player_id,
                            currency,
                            split.real,
                            split.bonus,
                            error.to_string(),
                        ))
                        .await;
                    Err(error)
                }
            }
        });
        Ok(())
    }
}

/// Appends the PLACE spin. Compensation appends a ROLLBACK audit row.
struct PersistPlaceSpin {
    ledger: Arc<dyn LedgerStore>,
}

#[async_trait]
impl SagaStep<PlaceSpinContext> for PersistPlaceSpin {
    fn step_id(&self) -> &str {
        "persist_place_spin"
    }

    fn step_name(&self) -> &str {
        "Persist PLACE spin"
    }

    fn kind(&self) -> StepKind {
        StepKind::Transactional
    }

    async fn execute(&self, ctx: &mut PlaceSpinContext) -> Result<()> {
        if let Some(existing) = &ctx.replayed_spin {
            ctx.spin = Some(existing.clone());
            return Ok(());
        }

        let round_id = required(&ctx.round, "round")?.id;
        let spin = Spin::place(
            round_id,
            ctx.transaction_id(),
            ctx.amount,
            ctx.split.unwrap_or_default(),
            ctx.free_spin_id.clone(),
        )?;
        let saved = self.ledger.save_spin(spin).await?;

        tracing::info!(spin_id = %saved.id, %round_id, "PLACE spin recorded");
        ctx.spin = Some(saved);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut PlaceSpinContext) -> Result<()> {
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

fn placed_event(ctx: &PlaceSpinContext) -> Result<Option<SpinEvent>> {
    if ctx.replayed_spin.is_some() {
        return Ok(None);
    }
    let spin = required(&ctx.spin, "PLACE spin")?;
    Ok(Some(SpinEvent::Placed(SpinEventData::new(
        ctx.saga.saga_id(),
        &ctx.session,
        &ctx.ext_round_id,
        spin,
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SagaOrchestrator;
    use crate::sagas::testing::{AGGREGATOR, Fixture};

    fn context(fixture: &Fixture, amount: i64, free_spin: Option<&str>) -> PlaceSpinContext {
        PlaceSpinContext::new(
            SagaContext::new(common::SagaId::new(), "tx-place"),
            fixture.session.clone(),
            "round-1",
            Money::from_minor(amount),
            free_spin.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn test_balance_step_splits_real_first() {
        let fixture = Fixture::new(100, 50).await;
        let step = ValidateBalance {
            wallet: fixture.deps.wallet.clone(),
            players: fixture.deps.players.clone(),
        };
        let mut ctx = context(&fixture, 120, None);

        step.execute(&mut ctx).await.unwrap();

        let split = ctx.split.unwrap();
        assert_eq!(split.real, Money::from_minor(100));
        assert_eq!(split.bonus, Money::from_minor(20));
    }

    #[tokio::test]
    async fn test_balance_step_rejects_over_limit() {
        let fixture = Fixture::new(1_000, 0).await;
        fixture
            .players
            .set_bet_limit(fixture.session.player_id, Some(Money::from_minor(50)))
            .await;
        let step = ValidateBalance {
            wallet: fixture.deps.wallet.clone(),
            players: fixture.deps.players.clone(),
        };
        let mut ctx = context(&fixture, 60, None);

        let result = step.execute(&mut ctx).await;
        assert!(matches!(result, Err(SagaError::BetLimitExceeded { .. })));
    }

    #[tokio::test]
    async fn test_debit_step_predicts_balance_before_wallet_answers() {
        let fixture = Fixture::new(100, 0).await;
        fixture
            .wallet
            .set_latency(std::time::Duration::from_millis(50))
            .await;
        let step = DebitWallet {
            wallet: fixture.deps.wallet.clone(),
            tasks: fixture.deps.tasks.clone(),
            reconciliation: fixture.deps.reconciliation.clone(),
        };
        let mut ctx = context(&fixture, 30, None);
        ctx.balance = Some(fixture.balance(100, 0));
        ctx.split = Some(WagerSplit::all_real(Money::from_minor(30)));

        step.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.predicted_balance, Some(fixture.balance(70, 0)));
        assert!(ctx.saga.flag(flags::DEBIT_ISSUED));
        assert_eq!(
            fixture.wallet.balance(fixture.session.player_id).await,
            Some(fixture.balance(100, 0))
        );

        fixture.deps.tasks.wait_idle().await;
        assert_eq!(
            fixture.wallet.balance(fixture.session.player_id).await,
            Some(fixture.balance(70, 0))
        );
    }

    #[tokio::test]
    async fn test_unplayable_game_is_rejected_before_the_round() {
        let fixture = Fixture::new(100, 0).await;
        fixture
            .catalog
            .add_game(
                domain::Game::new(fixture.session.game_id, AGGREGATOR, "Closed Reels")
                    .with_playable(false),
            )
            .await;
        let step = ValidateGame {
            catalog: fixture.deps.catalog.clone(),
        };
        let mut ctx = context(&fixture, 10, None);

        let result = step.execute(&mut ctx).await;

        assert!(matches!(result, Err(SagaError::GameUnavailable(_))));
        assert!(ctx.game.is_none());
    }

    #[tokio::test]
    async fn test_placed_spin_is_published_once() {
        let fixture = Fixture::new(100, 0).await;
        let definition = definition(&fixture.deps, RetryPolicy::no_retry());
        let orchestrator = SagaOrchestrator::new();

        let first = orchestrator
            .execute(&definition, context(&fixture, 10, None))
            .await;
        let replay = orchestrator
            .execute(&definition, context(&fixture, 10, None))
            .await;
        fixture.deps.tasks.wait_idle().await;

        assert!(first.is_completed());
        assert!(replay.is_completed());
        let events = fixture.publisher.events_of_type("SpinPlaced").await;
        assert_eq!(events.len(), 1);
    }
}
