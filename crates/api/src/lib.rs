//! Operational HTTP server for the spin saga core.
//!
//! Spin requests reach the sagas through aggregator adapters, so this server
//! exposes no spin endpoints. It serves health and Prometheus metrics, saga
//! audit records, and inspection and triggering of debit reconciliation.

pub mod config;
pub mod error;
pub mod routes;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ledger::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    DetachedTasks, InMemoryAuditLog, InMemoryEventPublisher, InMemoryGameCatalog,
    InMemoryPlayerService, InMemoryWalletService, ReconciliationQueue, Reconciler, SagaConfig,
    SagaDependencies, SagaOrchestrator, SpinService, TracingObserver,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub spins: SpinService,
    pub ledger: Arc<dyn LedgerStore>,
    pub reconciler: Reconciler,
    pub audit: InMemoryAuditLog,
}

impl AppState {
    /// Fire-and-forget work launched by the sagas.
    pub fn tasks(&self) -> &DetachedTasks {
        &self.spins.dependencies().tasks
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/health/ready", get(routes::health::ready))
        .route("/reconciliation", get(routes::reconciliation::snapshot))
        .route("/reconciliation/run", post(routes::reconciliation::run))
        .route("/sagas/attention", get(routes::sagas::needing_attention))
        .route("/sagas/{id}", get(routes::sagas::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around `ledger`.
///
/// Wallet, player, catalog and event bus are external systems; the in-memory
/// implementations stand in until their adapters are wired.
pub fn create_default_state(ledger: Arc<dyn LedgerStore>, config: &SagaConfig) -> Arc<AppState> {
    let wallet = Arc::new(InMemoryWalletService::new());
    let reconciliation = ReconciliationQueue::new();
    let audit = InMemoryAuditLog::with_capacity(config.audit_capacity);

    let deps = SagaDependencies {
        ledger: ledger.clone(),
        wallet: wallet.clone(),
        players: Arc::new(InMemoryPlayerService::new()),
        catalog: Arc::new(InMemoryGameCatalog::new()),
        publisher: Arc::new(InMemoryEventPublisher::new()),
        tasks: DetachedTasks::new(),
        reconciliation: reconciliation.clone(),
    };
    let orchestrator = SagaOrchestrator::new()
        .with_observer(Arc::new(TracingObserver))
        .with_observer(Arc::new(audit.clone()));

    Arc::new(AppState {
        spins: SpinService::new(deps, orchestrator, config),
        ledger,
        reconciler: Reconciler::new(reconciliation, wallet, config.reconcile_max_attempts),
        audit,
    })
}
