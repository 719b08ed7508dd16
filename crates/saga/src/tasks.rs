//! Fire-and-forget work launched from inside saga steps.
//!
//! A detached task is not awaited by the step that launches it. Its failure
//! is logged and counted, never returned to the saga. The PlaceSpin debit
//! uses this: the step returns a predicted balance while the wallet call is
//! still in flight, so until the task finishes the reported balance may
//! differ from the wallet's. Failed debits are handed to reconciliation.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures_util::FutureExt;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    in_flight: AtomicUsize,
    failures: AtomicU64,
    idle: Notify,
}

/// Runner for detached tasks on the tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct DetachedTasks {
    inner: Arc<Inner>,
}

impl DetachedTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches `task` without waiting for it.
    pub fn spawn<F, E>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();

        tokio::spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => tracing::debug!(task = name, "detached task finished"),
                Ok(Err(e)) => {
                    inner.failures.fetch_add(1, Ordering::SeqCst);
                    metrics::counter!("detached_task_failures_total", "task" => name).increment(1);
                    tracing::error!(task = name, error = %e, "detached task failed");
                }
                Err(panic) => {
                    inner.failures.fetch_add(1, Ordering::SeqCst);
                    metrics::counter!("detached_task_failures_total", "task" => name).increment(1);
                    tracing::error!(task = name, panic = %panic_message(&panic), "detached task panicked");
                }
            }

            if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle.notify_waiters();
            }
        });
    }

    /// Number of tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Number of tasks that returned an error or panicked.
    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    /// Waits until no task is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
