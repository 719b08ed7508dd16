//! Wallet service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::PlayerId;
use domain::{Balance, Currency, Money};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// The external wallet that owns player balances.
///
/// Every mutating call is idempotent by `transaction_id`.
#[async_trait]
pub trait WalletService: Send + Sync {
    async fn find_balance(&self, player_id: PlayerId) -> Result<Balance>;

    /// Takes `real` and `bonus` from the player's balance.
    async fn withdraw(
        &self,
        player_id: PlayerId,
        transaction_id: &str,
        currency: &Currency,
        real: Money,
        bonus: Money,
    ) -> Result<Balance>;

    /// Adds `real` and `bonus` to the player's balance.
    async fn deposit(
        &self,
        player_id: PlayerId,
        transaction_id: &str,
        currency: &Currency,
        real: Money,
        bonus: Money,
    ) -> Result<Balance>;

    /// Reverts the transaction, or blocks it if it has not arrived yet.
    async fn rollback(&self, player_id: PlayerId, transaction_id: &str) -> Result<()>;
}

/// Wallet call kinds, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletOperation {
    FindBalance,
    Withdraw,
    Deposit,
    Rollback,
}

/// A transaction recorded by the in-memory wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTransaction {
    pub player_id: PlayerId,
    pub operation: WalletOperation,
    pub real: Money,
    pub bonus: Money,
    pub rolled_back: bool,
}

#[derive(Debug, Default)]
struct InMemoryWalletState {
    balances: HashMap<PlayerId, Balance>,
    journal: HashMap<String, WalletTransaction>,
    calls: HashMap<WalletOperation, usize>,
    transient_failures: HashMap<WalletOperation, usize>,
    rejecting: HashMap<WalletOperation, bool>,
    reject_duplicates: bool,
    latency: Option<Duration>,
}

impl InMemoryWalletState {
    fn begin(&mut self, operation: WalletOperation) -> Result<()> {
        *self.calls.entry(operation).or_default() += 1;

        if let Some(remaining) = self.transient_failures.get_mut(&operation)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(SagaError::Unavailable(format!(
                "wallet {operation:?} temporarily unavailable"
            )));
        }
        if self.rejecting.get(&operation).copied().unwrap_or(false) {
            return Err(SagaError::Wallet(format!("wallet rejected {operation:?}")));
        }
        Ok(())
    }

    fn balance(&self, player_id: PlayerId) -> Result<&Balance> {
        self.balances
            .get(&player_id)
            .ok_or_else(|| SagaError::Wallet(format!("unknown player {player_id}")))
    }

    /// Returns the current balance if `transaction_id` was already processed.
    fn replayed(&self, player_id: PlayerId, transaction_id: &str) -> Result<Option<Balance>> {
        if !self.journal.contains_key(transaction_id) {
            return Ok(None);
        }
        if self.reject_duplicates {
            return Err(SagaError::DuplicateTransaction(transaction_id.to_string()));
        }
        Ok(Some(self.balance(player_id)?.clone()))
    }
}

/// In-memory wallet for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWalletService {
    state: Arc<RwLock<InMemoryWalletState>>,
}

impl InMemoryWalletService {
    /// Creates a new in-memory wallet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a player's balance.
    pub async fn set_balance(&self, player_id: PlayerId, balance: Balance) {
        self.state.write().await.balances.insert(player_id, balance);
    }

    /// Returns a player's balance.
    pub async fn balance(&self, player_id: PlayerId) -> Option<Balance> {
        self.state.read().await.balances.get(&player_id).cloned()
    }

    /// Returns the journal entry for a transaction id.
    pub async fn transaction(&self, transaction_id: &str) -> Option<WalletTransaction> {
        self.state.read().await.journal.get(transaction_id).cloned()
    }

    /// Returns the number of transactions that moved money.
    pub async fn applied_count(&self, operation: WalletOperation) -> usize {
        self.state
            .read()
            .await
            .journal
            .values()
            .filter(|t| t.operation == operation && !(t.real.is_zero() && t.bonus.is_zero()))
            .count()
    }

    /// Returns how many times `operation` was called.
    pub async fn calls(&self, operation: WalletOperation) -> usize {
        self.state
            .read()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of calls of any kind.
    pub async fn total_calls(&self) -> usize {
        self.state.read().await.calls.values().sum()
    }

    /// Makes the next `times` calls of `operation` fail with a transient error.
    pub async fn fail_next(&self, operation: WalletOperation, times: usize) {
        self.state
            .write()
            .await
            .transient_failures
            .insert(operation, times);
    }

    /// Makes every call of `operation` fail with a permanent rejection.
    pub async fn set_fail_on(&self, operation: WalletOperation, fail: bool) {
        self.state.write().await.rejecting.insert(operation, fail);
    }

    /// Answers replayed transaction ids with `DuplicateTransaction`.
    pub async fn set_reject_duplicates(&self, reject: bool) {
        self.state.write().await.reject_duplicates = reject;
    }

    /// Delays every call.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.write().await.latency = Some(latency);
    }

    async fn pause(&self) {
        let latency = self.state.read().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl WalletService for InMemoryWalletService {
    async fn find_balance(&self, player_id: PlayerId) -> Result<Balance> {
        self.pause().await;
        let mut state = self.state.write().await;
        state.begin(WalletOperation::FindBalance)?;
        Ok(state.balance(player_id)?.clone())
    }

    async fn withdraw(
        &self,
        player_id: PlayerId,
        transaction_id: &str,
        currency: &Currency,
        real: Money,
        bonus: Money,
    ) -> Result<Balance> {
        self.pause().await;
        let mut state = self.state.write().await;
        state.begin(WalletOperation::Withdraw)?;

        if let Some(balance) = state.replayed(player_id, transaction_id)? {
            return Ok(balance);
        }

        let current = state.balance(player_id)?;
        if current.currency != *currency {
            return Err(SagaError::Wallet(format!(
                "currency mismatch: wallet {}, request {currency}",
                current.currency
            )));
        }
        if real > current.real || bonus > current.bonus {
            return Err(SagaError::InsufficientBalance {
                amount: real + bonus,
                available: current.total(),
            });
        }

        let updated = current.debited(real, bonus);
        state.balances.insert(player_id, updated.clone());
        state.journal.insert(
            transaction_id.to_string(),
            WalletTransaction {
                player_id,
                operation: WalletOperation::Withdraw,
                real,
                bonus,
                rolled_back: false,
            },
        );
        Ok(updated)
    }

    async fn deposit(
        &self,
        player_id: PlayerId,
        transaction_id: &str,
        currency: &Currency,
        real: Money,
        bonus: Money,
    ) -> Result<Balance> {
        self.pause().await;
        let mut state = self.state.write().await;
        state.begin(WalletOperation::Deposit)?;

        if let Some(balance) = state.replayed(player_id, transaction_id)? {
            return Ok(balance);
        }

        let current = state.balance(player_id)?;
        if current.currency != *currency {
            return Err(SagaError::Wallet(format!(
                "currency mismatch: wallet {}, request {currency}",
                current.currency
            )));
        }

        let updated = current.credited(real, bonus);
        state.balances.insert(player_id, updated.clone());
        state.journal.insert(
            transaction_id.to_string(),
            WalletTransaction {
                player_id,
                operation: WalletOperation::Deposit,
                real,
                bonus,
                rolled_back: false,
            },
        );
        Ok(updated)
    }

    async fn rollback(&self, player_id: PlayerId, transaction_id: &str) -> Result<()> {
        self.pause().await;
        let mut state = self.state.write().await;
        state.begin(WalletOperation::Rollback)?;

        let Some(entry) = state.journal.get(transaction_id).cloned() else {
            // Tombstone: a withdraw arriving later with this id becomes a no-op.
            state.journal.insert(
                transaction_id.to_string(),
                WalletTransaction {
                    player_id,
                    operation: WalletOperation::Rollback,
                    real: Money::zero(),
                    bonus: Money::zero(),
                    rolled_back: true,
                },
            );
            return Ok(());
        };

        if entry.rolled_back {
            return Ok(());
        }

        let current = state.balance(entry.player_id)?;
        let reverted = match entry.operation {
            WalletOperation::Withdraw => current.credited(entry.real, entry.bonus),
            WalletOperation::Deposit => current.debited(entry.real, entry.bonus),
            WalletOperation::FindBalance | WalletOperation::Rollback => current.clone(),
        };
        state.balances.insert(entry.player_id, reverted);
        if let Some(entry) = state.journal.get_mut(transaction_id) {
            entry.rolled_back = true;
        }
        Ok(())
    }
}
