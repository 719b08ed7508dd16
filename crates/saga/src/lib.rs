//! Saga orchestration for real-money spins.
//!
//! The engine runs an ordered list of steps against a typed context. Each
//! step may be retried under a [`RetryPolicy`]; when one fails for good, the
//! steps that already completed are compensated in reverse order on a
//! detached task, so a caller that stops waiting cannot interrupt the
//! rollback.
//!
//! Four sagas are built on it:
//! 1. PlaceSpin: validate game, upsert round, check balance and bet limit,
//!    debit the wallet optimistically, record the PLACE spin
//! 2. SettleSpin: find the PLACE spin, split the win, credit the wallet,
//!    record the SETTLE spin
//! 3. RollbackSpin: refund the bet and record a ROLLBACK spin
//! 4. EndSpin: mark the round finished
//!
//! Debits that fail after the saga answered are queued for the
//! [`Reconciler`].

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod observer;
pub mod orchestrator;
pub mod reconciliation;
pub mod retry;
pub mod sagas;
pub mod service;
pub mod services;
pub mod state;
pub mod step;
pub mod tasks;

pub use audit::{InMemoryAuditLog, SagaAuditRecord};
pub use config::SagaConfig;
pub use context::{SagaContext, SagaData};
pub use error::{ErrorKind, Result, SagaError};
pub use events::{RoundEndedData, SpinEvent, SpinEventData};
pub use observer::{SagaObserver, StepRef, StepStatus, TracingObserver};
pub use orchestrator::{CompensationFailure, SagaDefinition, SagaExecution, SagaOrchestrator};
pub use reconciliation::{
    ReconciliationEntry, ReconciliationKind, ReconciliationQueue, ReconciliationReport,
    ReconciliationSnapshot, Reconciler,
};
pub use retry::RetryPolicy;
pub use sagas::SagaDependencies;
pub use service::{
    EndSpinRequest, PlaceSpinRequest, RollbackSpinRequest, SettleSpinRequest, SpinOutcome,
    SpinService,
};
pub use services::{
    EventPublisher, GameCatalog, InMemoryEventPublisher, InMemoryGameCatalog,
    InMemoryPlayerService, InMemoryWalletService, PlayerService, WalletOperation, WalletService,
};
pub use state::SagaState;
pub use step::{SagaStep, StepKind};
pub use tasks::DetachedTasks;
