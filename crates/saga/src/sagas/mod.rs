//! The spin sagas: PlaceSpin, SettleSpin, RollbackSpin and EndSpin.
//!
//! Each saga has its own typed context and a `definition` function that
//! wires its steps to the collaborators in [`SagaDependencies`].

pub mod end;
pub mod place;
pub mod rollback;
pub mod settle;

use std::sync::Arc;

use async_trait::async_trait;
use ledger::LedgerStore;

use crate::context::SagaData;
use crate::error::Result;
use crate::events::SpinEvent;
use crate::reconciliation::ReconciliationQueue;
use crate::services::{EventPublisher, GameCatalog, PlayerService, WalletService};
use crate::step::{SagaStep, StepKind};
use crate::tasks::DetachedTasks;

pub use end::EndSpinContext;
pub use place::PlaceSpinContext;
pub use rollback::RollbackSpinContext;
pub use settle::SettleSpinContext;

/// Saga names, also used to derive deterministic saga ids.
pub const PLACE_SPIN: &str = "PlaceSpin";
pub const SETTLE_SPIN: &str = "SettleSpin";
pub const ROLLBACK_SPIN: &str = "RollbackSpin";
pub const END_SPIN: &str = "EndSpin";

/// Context flags shared between a forward step and its compensation.
pub mod flags {
    /// The PlaceSpin debit was handed to a detached task.
    pub const DEBIT_ISSUED: &str = "wallet.debit.issued";
    /// The SettleSpin credit was accepted by the wallet.
    pub const CREDIT_APPLIED: &str = "wallet.credit.applied";
    /// The RollbackSpin refund was accepted by the wallet.
    pub const REFUND_APPLIED: &str = "wallet.refund.applied";
}

/// Collaborators the spin saga steps talk to.
#[derive(Clone)]
pub struct SagaDependencies {
    pub ledger: Arc<dyn LedgerStore>,
    pub wallet: Arc<dyn WalletService>,
    pub players: Arc<dyn PlayerService>,
    pub catalog: Arc<dyn GameCatalog>,
    pub publisher: Arc<dyn EventPublisher>,
    pub tasks: DetachedTasks,
    pub reconciliation: ReconciliationQueue,
}

/// Publishes the event built from the context on a detached task.
///
/// `build` returns `None` when there is nothing new to announce, for example
/// when a replayed request found its spin already recorded.
pub(crate) struct PublishEventStep<C> {
    id: &'static str,
    publisher: Arc<dyn EventPublisher>,
    tasks: DetachedTasks,
    build: fn(&C) -> Result<Option<SpinEvent>>,
}

impl<C> PublishEventStep<C> {
    pub(crate) fn new(
        id: &'static str,
        deps: &SagaDependencies,
        build: fn(&C) -> Result<Option<SpinEvent>>,
    ) -> Self {
        Self {
            id,
            publisher: deps.publisher.clone(),
            tasks: deps.tasks.clone(),
            build,
        }
    }
}

#[async_trait]
impl<C: SagaData> SagaStep<C> for PublishEventStep<C> {
    fn step_id(&self) -> &str {
        self.id
    }

    fn step_name(&self) -> &str {
        "Publish event"
    }

    fn kind(&self) -> StepKind {
        StepKind::Validation
    }

    async fn execute(&self, ctx: &mut C) -> Result<()> {
        let Some(event) = (self.build)(ctx)? else {
            return Ok(());
        };
        let publisher = self.publisher.clone();
        self.tasks
            .spawn("publish_event", async move { publisher.publish(event).await });
        Ok(())
    }
}
