//! API server entry point.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use api::config::{Config, LogFormat};
use api::worker::ReconcileWorker;
use ledger::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How long shutdown waits for detached debits and events.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_ledger(config: &Config) -> Result<Arc<dyn LedgerStore>, Box<dyn Error>> {
    let Some(url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, using the in-memory ledger");
        return Ok(Arc::new(InMemoryLedgerStore::new()));
    };
    let pool = sqlx::PgPool::connect(url).await?;
    let store = PostgresLedgerStore::new(pool);
    store.run_migrations().await?;
    tracing::info!("connected to the Postgres ledger");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Ledger and application state
    let ledger = open_ledger(&config).await?;
    let state = api::create_default_state(ledger, &config.saga);

    // 4. Reconciliation worker
    let worker = ReconcileWorker::spawn(state.reconciler.clone(), config.reconcile_interval);

    // 5. Serve
    let app = api::create_app(state.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 6. Drain detached work, then give pending debits one last pass
    worker.shutdown().await;
    if tokio::time::timeout(DRAIN_TIMEOUT, state.tasks().wait_idle())
        .await
        .is_err()
    {
        tracing::warn!(
            in_flight = state.tasks().in_flight(),
            "detached tasks still running at shutdown"
        );
    }
    let report = state.reconciler.run_once().await;
    tracing::info!(?report, "server shut down gracefully");
    Ok(())
}
