//! Player service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::PlayerId;
use domain::Money;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// Player profile lookups needed by the sagas.
#[async_trait]
pub trait PlayerService: Send + Sync {
    /// Returns the player's current bet limit, if one is set.
    async fn find_current_bet_limit(&self, player_id: PlayerId) -> Result<Option<Money>>;
}

/// In-memory player service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPlayerService {
    limits: Arc<RwLock<HashMap<PlayerId, Money>>>,
    failing_lookups: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryPlayerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or clears a player's bet limit.
    pub async fn set_bet_limit(&self, player_id: PlayerId, limit: Option<Money>) {
        let mut limits = self.limits.write().await;
        match limit {
            Some(limit) => limits.insert(player_id, limit),
            None => limits.remove(&player_id),
        };
    }

    /// Makes the next `times` lookups fail with a timeout.
    pub fn fail_next_lookups(&self, times: usize) {
        self.failing_lookups.store(times, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayerService for InMemoryPlayerService {
    async fn find_current_bet_limit(&self, player_id: PlayerId) -> Result<Option<Money>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SagaError::Timeout("player service".to_string()));
        }
        Ok(self.limits.read().await.get(&player_id).copied())
    }
}
