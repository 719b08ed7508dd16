//! Periodic reconciliation of optimistic debits.

use std::time::Duration;

use saga::Reconciler;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to the background task that runs reconciliation passes.
pub struct ReconcileWorker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReconcileWorker {
    /// Starts a pass every `interval`, the first one after one full interval.
    pub fn spawn(reconciler: Reconciler, interval: Duration) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(reconciler, interval, stop_rx));
        Self { stop, handle }
    }

    /// Signals the worker and waits for the pass in progress to finish.
    pub async fn shutdown(self) {
        if let Err(e) = self.stop.send(true) {
            tracing::error!(error = %e, "reconciliation worker already stopped");
        }
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "reconciliation worker failed");
        }
    }
}

async fn run(reconciler: Reconciler, interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = reconciler.run_once().await;
                metrics::counter!("reconciliation_runs_total").increment(1);
                if report.resolved + report.retried + report.escalated > 0 {
                    tracing::info!(?report, "reconciliation pass");
                }
            }
            _ = stop.changed() => break,
        }
    }
}
