use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{GameId, RoundId, SessionId};
use domain::{Round, Spin, SpinType};
use tokio::sync::RwLock;

use crate::{LedgerError, Result, store::LedgerStore};

#[derive(Debug, Default)]
struct LedgerState {
    rounds: HashMap<RoundId, Round>,
    round_keys: HashMap<(SessionId, String), RoundId>,
    spins: Vec<Spin>,
}

/// In-memory ledger store implementation for testing.
///
/// Provides the same uniqueness guarantees as the PostgreSQL implementation:
/// every write happens under one lock, so the round upsert is atomic.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    failing_spin_saves: Arc<AtomicUsize>,
    failing_round_writes: Arc<AtomicUsize>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored rounds.
    pub async fn round_count(&self) -> usize {
        self.state.read().await.rounds.len()
    }

    /// Returns the number of stored spins.
    pub async fn spin_count(&self) -> usize {
        self.state.read().await.spins.len()
    }

    /// Returns the stored spins of the given type.
    pub async fn spins_of_type(&self, spin_type: SpinType) -> Vec<Spin> {
        self.state
            .read()
            .await
            .spins
            .iter()
            .filter(|s| s.spin_type == spin_type)
            .cloned()
            .collect()
    }

    /// Makes the next `count` spin saves fail with a transient error.
    pub fn fail_next_spin_saves(&self, count: usize) {
        self.failing_spin_saves.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` round upserts/finishes fail with a transient error.
    pub fn fail_next_round_writes(&self, count: usize) {
        self.failing_round_writes.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_or_create_round(
        &self,
        session_id: SessionId,
        game_id: GameId,
        ext_round_id: &str,
    ) -> Result<Round> {
        if Self::take_failure(&self.failing_round_writes) {
            return Err(LedgerError::Unavailable("injected round write failure".into()));
        }

        let mut state = self.state.write().await;
        let key = (session_id, ext_round_id.to_string());

        if let Some(id) = state.round_keys.get(&key)
            && let Some(round) = state.rounds.get(id)
        {
            return Ok(round.clone());
        }

        let round = Round::new(session_id, game_id, ext_round_id);
        state.round_keys.insert(key, round.id);
        state.rounds.insert(round.id, round.clone());
        Ok(round)
    }

    async fn find_round_by_ext_id(
        &self,
        session_id: SessionId,
        ext_round_id: &str,
    ) -> Result<Option<Round>> {
        let state = self.state.read().await;
        Ok(state
            .round_keys
            .get(&(session_id, ext_round_id.to_string()))
            .and_then(|id| state.rounds.get(id))
            .cloned())
    }

    async fn find_place_spin_by_round_id(&self, round_id: RoundId) -> Result<Option<Spin>> {
        let state = self.state.read().await;
        Ok(state
            .spins
            .iter()
            .find(|s| s.round_id == round_id && s.spin_type == SpinType::Place)
            .cloned())
    }

    async fn find_spins_by_round_id(&self, round_id: RoundId) -> Result<Vec<Spin>> {
        let state = self.state.read().await;
        Ok(state
            .spins
            .iter()
            .filter(|s| s.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn save_spin(&self, spin: Spin) -> Result<Spin> {
        if Self::take_failure(&self.failing_spin_saves) {
            return Err(LedgerError::Unavailable("injected spin save failure".into()));
        }

        let mut state = self.state.write().await;

        if let Some(existing) = state
            .spins
            .iter()
            .find(|s| {
                s.round_id == spin.round_id
                    && s.transaction_id == spin.transaction_id
                    && s.spin_type == spin.spin_type
            })
        {
            return Ok(existing.clone());
        }

        if !state.rounds.contains_key(&spin.round_id) {
            return Err(LedgerError::RoundNotFound(spin.round_id));
        }

        if spin.spin_type == SpinType::Place
            && let Some(existing) = state
                .spins
                .iter()
                .find(|s| s.round_id == spin.round_id && s.spin_type == SpinType::Place)
        {
            return Err(LedgerError::DuplicatePlaceSpin {
                round_id: spin.round_id,
                existing_transaction: existing.transaction_id.clone(),
            });
        }

        if let Some(reference_id) = spin.reference_id {
            let reference = state.spins.iter().find(|s| s.id == reference_id);
            match reference {
                Some(reference) => spin.ensure_references(reference)?,
                None => {
                    return Err(LedgerError::ReferenceNotFound {
                        round_id: spin.round_id,
                        reference_id,
                    });
                }
            }
        }

        state.spins.push(spin.clone());
        Ok(spin)
    }

    async fn finish_round(&self, round_id: RoundId, finished_at: DateTime<Utc>) -> Result<Round> {
        if Self::take_failure(&self.failing_round_writes) {
            return Err(LedgerError::Unavailable("injected round write failure".into()));
        }

        let mut state = self.state.write().await;
        let round = state
            .rounds
            .get_mut(&round_id)
            .ok_or(LedgerError::RoundNotFound(round_id))?;
        round.finish(finished_at);
        Ok(round.clone())
    }
}
