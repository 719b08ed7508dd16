//! Reconciliation of optimistic wallet debits.
//!
//! PlaceSpin hands its wallet debit to a detached task and answers with a
//! predicted balance. Two things can go wrong after that:
//!
//! - the debit itself fails: the bet is recorded but the money was never
//!   taken. A `PendingDebit` entry re-issues the withdraw with the same
//!   idempotency key.
//! - the saga fails after the debit was issued: the money may have been
//!   taken for a bet that does not exist. An `OrphanedDebit` entry asks the
//!   wallet to roll the transaction back, which also blocks a debit that has
//!   not landed yet.
//!
//! Entries that keep failing, or fail with a non-transient error, move to a
//! manual review list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{PlayerId, SagaId};
use domain::{Currency, Money};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{Result, SagaError};
use crate::services::WalletService;

/// What needs to be done for an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconciliationKind {
    /// The debit did not land and must be retried.
    PendingDebit {
        currency: Currency,
        real: Money,
        bonus: Money,
    },
    /// The debit belongs to a failed saga and must be rolled back.
    OrphanedDebit,
}

/// One saga whose wallet state needs repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationEntry {
    pub saga_id: SagaId,
    pub player_id: PlayerId,
    pub kind: ReconciliationKind,
    pub reason: String,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl ReconciliationEntry {
    pub fn pending_debit(
        saga_id: SagaId,
        player_id: PlayerId,
        currency: Currency,
        real: Money,
        bonus: Money,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            saga_id,
            player_id,
            kind: ReconciliationKind::PendingDebit {
                currency,
                real,
                bonus,
            },
            reason: reason.into(),
            attempts: 0,
            recorded_at: Utc::now(),
        }
    }

    pub fn orphaned_debit(saga_id: SagaId, player_id: PlayerId, reason: impl Into<String>) -> Self {
        Self {
            saga_id,
            player_id,
            kind: ReconciliationKind::OrphanedDebit,
            reason: reason.into(),
            attempts: 0,
            recorded_at: Utc::now(),
        }
    }
}

/// Pending and escalated entries at one point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationSnapshot {
    pub pending: Vec<ReconciliationEntry>,
    pub manual_review: Vec<ReconciliationEntry>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<ReconciliationEntry>,
    manual_review: Vec<ReconciliationEntry>,
}

impl QueueState {
    fn upsert(&mut self, entry: ReconciliationEntry) {
        if self.manual_review.iter().any(|e| e.saga_id == entry.saga_id) {
            return;
        }
        if let Some(existing) = self.pending.iter_mut().find(|e| e.saga_id == entry.saga_id) {
            // A rollback supersedes a retry of the same debit.
            if entry.kind == ReconciliationKind::OrphanedDebit {
                existing.kind = ReconciliationKind::OrphanedDebit;
                existing.reason = entry.reason;
            }
            return;
        }
        self.pending.push(entry);
    }

    fn report_gauge(&self) {
        metrics::gauge!("reconciliation_pending").set(self.pending.len() as f64);
    }
}

/// Shared queue of sagas whose wallet state needs repair.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationQueue {
    state: Arc<Mutex<QueueState>>,
}

impl ReconciliationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. One entry is kept per saga.
    pub async fn record(&self, entry: ReconciliationEntry) {
        tracing::warn!(
            saga_id = %entry.saga_id,
            kind = ?entry.kind,
            reason = %entry.reason,
            "reconciliation entry recorded"
        );
        let mut state = self.state.lock().await;
        state.upsert(entry);
        state.report_gauge();
    }

    /// Drops the orphaned-debit entry of a saga that has since completed.
    ///
    /// A pending debit still has to reach the wallet and is kept, as are
    /// entries in manual review. Returns true if an entry was removed.
    pub async fn resolve_orphan(&self, saga_id: SagaId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state
            .pending
            .retain(|e| e.saga_id != saga_id || e.kind != ReconciliationKind::OrphanedDebit);
        let removed = state.pending.len() != before;
        if removed {
            tracing::info!(%saga_id, "reconciliation entry resolved by a later run");
            state.report_gauge();
        }
        removed
    }

    pub async fn pending(&self) -> Vec<ReconciliationEntry> {
        self.state.lock().await.pending.clone()
    }

    pub async fn manual_review(&self) -> Vec<ReconciliationEntry> {
        self.state.lock().await.manual_review.clone()
    }

    pub async fn snapshot(&self) -> ReconciliationSnapshot {
        let state = self.state.lock().await;
        ReconciliationSnapshot {
            pending: state.pending.clone(),
            manual_review: state.manual_review.clone(),
        }
    }

    async fn take_pending(&self) -> Vec<ReconciliationEntry> {
        let mut state = self.state.lock().await;
        let entries = std::mem::take(&mut state.pending);
        state.report_gauge();
        entries
    }

    async fn requeue(&self, entry: ReconciliationEntry) {
        let mut state = self.state.lock().await;
        state.upsert(entry);
        state.report_gauge();
    }

    async fn escalate(&self, entry: ReconciliationEntry) {
        let mut state = self.state.lock().await;
        state.pending.retain(|e| e.saga_id != entry.saga_id);
        state.manual_review.push(entry);
        state.report_gauge();
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub resolved: usize,
    pub retried: usize,
    pub escalated: usize,
}

/// Drains the queue against the wallet.
#[derive(Clone)]
pub struct Reconciler {
    queue: ReconciliationQueue,
    wallet: Arc<dyn WalletService>,
    max_attempts: u32,
}

impl Reconciler {
    pub fn new(queue: ReconciliationQueue, wallet: Arc<dyn WalletService>, max_attempts: u32) -> Self {
        Self {
            queue,
            wallet,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn queue(&self) -> &ReconciliationQueue {
        &self.queue
    }

    /// Processes every pending entry once.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();

        for mut entry in self.queue.take_pending().await {
            match self.resolve(&entry).await {
                Ok(()) => {
                    tracing::info!(saga_id = %entry.saga_id, kind = ?entry.kind, "reconciled");
                    report.resolved += 1;
                }
                Err(error) => {
                    entry.attempts += 1;
                    entry.reason = error.to_string();

                    if !error.is_transient() || entry.attempts >= self.max_attempts {
                        tracing::error!(
                            saga_id = %entry.saga_id,
                            attempts = entry.attempts,
                            error = %error,
                            "reconciliation escalated to manual review"
                        );
                        report.escalated += 1;
                        self.queue.escalate(entry).await;
                    } else {
                        tracing::warn!(
                            saga_id = %entry.saga_id,
                            attempts = entry.attempts,
                            error = %error,
                            "reconciliation will be retried"
                        );
                        report.retried += 1;
                        self.queue.requeue(entry).await;
                    }
                }
            }
        }

        report
    }

    async fn resolve(&self, entry: &ReconciliationEntry) -> Result<()> {
        let key = entry.saga_id.transaction_key();
        match &entry.kind {
            ReconciliationKind::PendingDebit {
                currency,
                real,
                bonus,
            } => match self
                .wallet
                .withdraw(entry.player_id, &key, currency, *real, *bonus)
                .await
            {
                Ok(_) | Err(SagaError::DuplicateTransaction(_)) => Ok(()),
                Err(e) => Err(e),
            },
            ReconciliationKind::OrphanedDebit => self.wallet.rollback(entry.player_id, &key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryWalletService, WalletOperation};
    use domain::Balance;

    fn eur(real: i64, bonus: i64) -> Balance {
        Balance::new(Money::from_minor(real), Money::from_minor(bonus), "EUR")
    }

    async fn setup(balance: Balance) -> (Reconciler, InMemoryWalletService, PlayerId) {
        let wallet = InMemoryWalletService::new();
        let player = PlayerId::new();
        wallet.set_balance(player, balance).await;
        let reconciler = Reconciler::new(ReconciliationQueue::new(), Arc::new(wallet.clone()), 3);
        (reconciler, wallet, player)
    }

    fn pending(saga_id: SagaId, player: PlayerId, real: i64) -> ReconciliationEntry {
        ReconciliationEntry::pending_debit(
            saga_id,
            player,
            Currency::new("EUR"),
            Money::from_minor(real),
            Money::zero(),
            "wallet timeout",
        )
    }

    #[tokio::test]
    async fn test_resolving_an_orphan_keeps_pending_debits() {
        let queue = ReconciliationQueue::new();
        let player = PlayerId::new();
        let orphan = SagaId::new();
        let debit = SagaId::new();
        queue
            .record(ReconciliationEntry::orphaned_debit(orphan, player, "persist failed"))
            .await;
        queue.record(pending(debit, player, 10)).await;

        assert!(queue.resolve_orphan(orphan).await);
        assert!(!queue.resolve_orphan(debit).await);

        let left = queue.pending().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].saga_id, debit);
    }

    #[tokio::test]
    async fn test_pending_debit_is_reissued_with_same_key() {
        let (reconciler, wallet, player) = setup(eur(100, 0)).await;
        let saga_id = SagaId::new();
        reconciler.queue().record(pending(saga_id, player, 30)).await;

        let report = reconciler.run_once().await;

        assert_eq!(report.resolved, 1);
        assert_eq!(wallet.balance(player).await.unwrap(), eur(70, 0));
        assert!(wallet.transaction(&saga_id.transaction_key()).await.is_some());
        assert!(reconciler.queue().pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_already_applied_debit_counts_as_resolved() {
        let (reconciler, wallet, player) = setup(eur(100, 0)).await;
        wallet.set_reject_duplicates(true).await;
        let saga_id = SagaId::new();
        wallet
            .withdraw(
                player,
                &saga_id.transaction_key(),
                &Currency::new("EUR"),
                Money::from_minor(30),
                Money::zero(),
            )
            .await
            .unwrap();
        reconciler.queue().record(pending(saga_id, player, 30)).await;

        let report = reconciler.run_once().await;

        assert_eq!(report.resolved, 1);
        assert_eq!(wallet.balance(player).await.unwrap(), eur(70, 0));
    }

    #[tokio::test]
    async fn test_orphaned_debit_is_rolled_back() {
        let (reconciler, wallet, player) = setup(eur(100, 0)).await;
        let saga_id = SagaId::new();
        wallet
            .withdraw(
                player,
                &saga_id.transaction_key(),
                &Currency::new("EUR"),
                Money::from_minor(30),
                Money::zero(),
            )
            .await
            .unwrap();
        reconciler
            .queue()
            .record(ReconciliationEntry::orphaned_debit(saga_id, player, "saga failed"))
            .await;

        reconciler.run_once().await;

        assert_eq!(wallet.balance(player).await.unwrap(), eur(100, 0));
    }

    #[tokio::test]
    async fn test_orphan_supersedes_pending_retry() {
        let queue = ReconciliationQueue::new();
        let saga_id = SagaId::new();
        let player = PlayerId::new();

        queue.record(pending(saga_id, player, 30)).await;
        queue
            .record(ReconciliationEntry::orphaned_debit(saga_id, player, "saga failed"))
            .await;
        queue.record(pending(saga_id, player, 30)).await;

        let entries = queue.pending().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ReconciliationKind::OrphanedDebit);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_escalate() {
        let (reconciler, wallet, player) = setup(eur(100, 0)).await;
        wallet.fail_next(WalletOperation::Withdraw, 10).await;
        reconciler.queue().record(pending(SagaId::new(), player, 30)).await;

        assert_eq!(reconciler.run_once().await.retried, 1);
        assert_eq!(reconciler.run_once().await.retried, 1);
        assert_eq!(reconciler.run_once().await.escalated, 1);

        let snapshot = reconciler.queue().snapshot().await;
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.manual_review.len(), 1);
        assert_eq!(snapshot.manual_review[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failures_escalate_immediately() {
        let (reconciler, _wallet, player) = setup(eur(10, 0)).await;
        reconciler.queue().record(pending(SagaId::new(), player, 30)).await;

        let report = reconciler.run_once().await;

        assert_eq!(report.escalated, 1);
        assert_eq!(reconciler.queue().manual_review().await.len(), 1);
    }
}
