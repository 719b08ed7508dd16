//! Use-case facade running the spin sagas.

use common::SagaId;
use domain::{Balance, Money, Round, Session, Spin};
use serde::{Deserialize, Serialize};

use crate::config::SagaConfig;
use crate::context::SagaContext;
use crate::error::Result;
use crate::orchestrator::{SagaDefinition, SagaExecution, SagaOrchestrator};
use crate::reconciliation::ReconciliationEntry;
use crate::sagas::{
    self, END_SPIN, EndSpinContext, PLACE_SPIN, PlaceSpinContext, ROLLBACK_SPIN,
    RollbackSpinContext, SETTLE_SPIN, SagaDependencies, SettleSpinContext, flags,
};

/// A bet on a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceSpinRequest {
    pub session: Session,
    pub ext_round_id: String,
    pub transaction_id: String,
    pub amount: Money,
    pub free_spin_id: Option<String>,
}

/// The result of a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleSpinRequest {
    pub session: Session,
    pub ext_round_id: String,
    pub transaction_id: String,
    pub win_amount: Money,
    pub free_spin_id: Option<String>,
}

/// Cancellation of the bet on a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSpinRequest {
    pub session: Session,
    pub ext_round_id: String,
    pub transaction_id: String,
}

/// Closure of a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndSpinRequest {
    pub session: Session,
    pub ext_round_id: String,
    pub transaction_id: String,
}

/// What a spin saga produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpinOutcome {
    pub saga_id: SagaId,
    pub round: Option<Round>,
    pub spin: Option<Spin>,
    /// For PLACE the predicted balance; otherwise what the wallet reported.
    pub balance: Option<Balance>,
}

impl SpinOutcome {
    fn empty(saga_id: SagaId) -> Self {
        Self {
            saga_id,
            round: None,
            spin: None,
            balance: None,
        }
    }
}

/// Runs the four spin sagas against one set of collaborators.
pub struct SpinService {
    deps: SagaDependencies,
    orchestrator: SagaOrchestrator,
    place: SagaDefinition<PlaceSpinContext>,
    settle: SagaDefinition<SettleSpinContext>,
    rollback: SagaDefinition<RollbackSpinContext>,
    end: SagaDefinition<EndSpinContext>,
}

impl SpinService {
    pub fn new(deps: SagaDependencies, orchestrator: SagaOrchestrator, config: &SagaConfig) -> Self {
        let policy = config.retry_policy();
        Self {
            place: sagas::place::definition(&deps, policy.clone()),
            settle: sagas::settle::definition(&deps, policy.clone()),
            rollback: sagas::rollback::definition(&deps, policy.clone()),
            end: sagas::end::definition(&deps, policy),
            deps,
            orchestrator,
        }
    }

    pub fn dependencies(&self) -> &SagaDependencies {
        &self.deps
    }

    #[tracing::instrument(
        skip(self, request),
        fields(tx = %request.transaction_id, ext_round_id = %request.ext_round_id)
    )]
    pub async fn place_spin(&self, request: PlaceSpinRequest) -> Result<SpinOutcome> {
        let saga_id = SagaId::for_transaction(PLACE_SPIN, request.session.id, &request.transaction_id);
        let player_id = request.session.player_id;
        let context = PlaceSpinContext::new(
            SagaContext::new(saga_id, request.transaction_id),
            request.session,
            request.ext_round_id,
            request.amount,
            request.free_spin_id,
        );

        let execution = self.orchestrator.execute(&self.place, context).await;
        if !execution.is_completed() && debit_issued(&execution) {
            let reason = execution
                .error
                .as_ref()
                .or(execution.fault.as_ref())
                .map(ToString::to_string)
                .unwrap_or_default();
            tracing::warn!(%saga_id, "PlaceSpin failed after its debit was issued");
            self.deps
                .reconciliation
                .record(ReconciliationEntry::orphaned_debit(saga_id, player_id, reason))
                .await;
        }

        let completed = execution.is_completed();
        let ctx = execution.into_result()?;
        if completed {
            // A retry that completed supersedes a repair queued by an earlier attempt.
            self.deps.reconciliation.resolve_orphan(saga_id).await;
        }
        Ok(SpinOutcome {
            saga_id,
            round: ctx.round,
            spin: ctx.spin,
            balance: ctx.predicted_balance,
        })
    }

    #[tracing::instrument(
        skip(self, request),
        fields(tx = %request.transaction_id, ext_round_id = %request.ext_round_id)
    )]
    pub async fn settle_spin(&self, request: SettleSpinRequest) -> Result<SpinOutcome> {
        let saga_id = SagaId::for_transaction(SETTLE_SPIN, request.session.id, &request.transaction_id);
        if !request.win_amount.is_positive() {
            tracing::debug!(win = %request.win_amount, "nothing to settle");
            return Ok(SpinOutcome::empty(saga_id));
        }

        let context = SettleSpinContext::new(
            SagaContext::new(saga_id, request.transaction_id),
            request.session,
            request.ext_round_id,
            request.win_amount,
            request.free_spin_id,
        );
        let ctx = self
            .orchestrator
            .execute(&self.settle, context)
            .await
            .into_result()?;
        Ok(SpinOutcome {
            saga_id,
            round: ctx.round,
            spin: ctx.spin,
            balance: ctx.balance,
        })
    }

    #[tracing::instrument(
        skip(self, request),
        fields(tx = %request.transaction_id, ext_round_id = %request.ext_round_id)
    )]
    pub async fn rollback_spin(&self, request: RollbackSpinRequest) -> Result<SpinOutcome> {
        let saga_id = SagaId::for_transaction(ROLLBACK_SPIN, request.session.id, &request.transaction_id);
        let context = RollbackSpinContext::new(
            SagaContext::new(saga_id, request.transaction_id),
            request.session,
            request.ext_round_id,
        );
        let ctx = self
            .orchestrator
            .execute(&self.rollback, context)
            .await
            .into_result()?;
        Ok(SpinOutcome {
            saga_id,
            round: ctx.round,
            spin: ctx.spin,
            balance: ctx.balance,
        })
    }

    #[tracing::instrument(
        skip(self, request),
        fields(tx = %request.transaction_id, ext_round_id = %request.ext_round_id)
    )]
    pub async fn end_spin(&self, request: EndSpinRequest) -> Result<SpinOutcome> {
        let saga_id = SagaId::for_transaction(END_SPIN, request.session.id, &request.transaction_id);
        let context = EndSpinContext::new(
            SagaContext::new(saga_id, request.transaction_id),
            request.session,
            request.ext_round_id,
        );
        let ctx = self
            .orchestrator
            .execute(&self.end, context)
            .await
            .into_result()?;
        Ok(SpinOutcome {
            round: ctx.round,
            ..SpinOutcome::empty(saga_id)
        })
    }
}

fn debit_issued(execution: &SagaExecution<PlaceSpinContext>) -> bool {
    execution
        .context
        .as_ref()
        .is_some_and(|ctx| ctx.saga.flag(flags::DEBIT_ISSUED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sagas::testing::Fixture;
    use crate::services::WalletOperation;
    use domain::SpinType;
    use ledger::LedgerError;

    fn service(fixture: &Fixture) -> SpinService {
        SpinService::new(
            fixture.deps.clone(),
            SagaOrchestrator::new(),
            &SagaConfig {
                retry_delay: std::time::Duration::from_millis(1),
                ..SagaConfig::default()
            },
        )
    }

    fn place(fixture: &Fixture, tx: &str, amount: i64) -> PlaceSpinRequest {
        PlaceSpinRequest {
            session: fixture.session.clone(),
            ext_round_id: "round-1".to_string(),
            transaction_id: tx.to_string(),
            amount: Money::from_minor(amount),
            free_spin_id: None,
        }
    }

    #[tokio::test]
    async fn test_place_returns_predicted_balance() {
        let fixture = Fixture::new(100, 20).await;
        let service = service(&fixture);

        let outcome = service.place_spin(place(&fixture, "tx-1", 110)).await.unwrap();

        assert_eq!(outcome.balance, Some(fixture.balance(0, 10)));
        let spin = outcome.spin.unwrap();
        assert_eq!(spin.real_amount, Money::from_minor(100));
        assert_eq!(spin.bonus_amount, Money::from_minor(10));
        assert_eq!(outcome.saga_id, SagaId::for_transaction(PLACE_SPIN, fixture.session.id, "tx-1"));
    }

    #[tokio::test]
    async fn test_second_bet_on_a_round_is_rejected_before_the_debit() {
        let fixture = Fixture::new(100, 0).await;
        let service = service(&fixture);
        service.place_spin(place(&fixture, "tx-1", 10)).await.unwrap();
        fixture.deps.tasks.wait_idle().await;

        let result = service.place_spin(place(&fixture, "tx-2", 10)).await;

        assert!(matches!(
            result,
            Err(crate::SagaError::Ledger(LedgerError::DuplicatePlaceSpin { .. }))
        ));
        fixture.deps.tasks.wait_idle().await;
        assert_eq!(fixture.wallet.calls(WalletOperation::Withdraw).await, 1);
    }

    #[tokio::test]
    async fn test_failed_persist_after_debit_queues_orphaned_debit() {
        let fixture = Fixture::new(100, 0).await;
        fixture.ledger.fail_next_spin_saves(10);
        let service = service(&fixture);

        let result = service.place_spin(place(&fixture, "tx-1", 10)).await;
        assert!(result.is_err());

        let pending = fixture.deps.reconciliation.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].saga_id,
            SagaId::for_transaction(PLACE_SPIN, fixture.session.id, "tx-1")
        );
        assert!(fixture.ledger.spins_of_type(SpinType::Place).await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_win_skips_the_saga() {
        let fixture = Fixture::new(100, 0).await;
        let service = service(&fixture);

        let outcome = service
            .settle_spin(SettleSpinRequest {
                session: fixture.session.clone(),
                ext_round_id: "never-placed".to_string(),
                transaction_id: "tx-settle".to_string(),
                win_amount: Money::zero(),
                free_spin_id: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.spin, None);
        assert_eq!(fixture.wallet.total_calls().await, 0);
        assert_eq!(fixture.ledger.round_count().await, 0);
    }
}
