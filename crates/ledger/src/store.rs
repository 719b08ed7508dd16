use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{GameId, RoundId, SessionId, SpinId};
use domain::{Round, Spin, SpinType};

use crate::Result;

/// Storage for rounds and the append-only spin ledger.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the round for `(session_id, ext_round_id)`, creating it if absent.
    ///
    /// Must be an atomic upsert: concurrent calls with the same key converge
    /// on a single round row.
    async fn find_or_create_round(
        &self,
        session_id: SessionId,
        game_id: GameId,
        ext_round_id: &str,
    ) -> Result<Round>;

    /// Looks up a round by its external key.
    async fn find_round_by_ext_id(
        &self,
        session_id: SessionId,
        ext_round_id: &str,
    ) -> Result<Option<Round>>;

    /// Returns the PLACE spin of a round, if any.
    async fn find_place_spin_by_round_id(&self, round_id: RoundId) -> Result<Option<Spin>>;

    /// Returns all spins of a round in insertion order.
    async fn find_spins_by_round_id(&self, round_id: RoundId) -> Result<Vec<Spin>>;

    /// Appends a spin.
    ///
    /// Idempotent on `(transaction_id, spin_type)`: saving a spin whose pair
    /// already exists returns the stored row. A second PLACE spin for a round
    /// fails with `DuplicatePlaceSpin`; a reference outside the round fails
    /// with `ReferenceNotFound`.
    async fn save_spin(&self, spin: Spin) -> Result<Spin>;

    /// Sets the round's `finished` flag.
    ///
    /// Finishing an already finished round returns it unchanged.
    async fn finish_round(&self, round_id: RoundId, finished_at: DateTime<Utc>) -> Result<Round>;

    /// Looks up a round together with its PLACE spin.
    ///
    /// Backends that can answer this in one round trip should override it.
    async fn find_round_with_place_spin(
        &self,
        session_id: SessionId,
        ext_round_id: &str,
    ) -> Result<Option<(Round, Option<Spin>)>> {
        let Some(round) = self.find_round_by_ext_id(session_id, ext_round_id).await? else {
            return Ok(None);
        };
        let place = self.find_place_spin_by_round_id(round.id).await?;
        Ok(Some((round, place)))
    }
}

/// Extension trait providing convenience lookups for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Returns the first spin of `spin_type` that references `reference_id`.
    async fn find_spin_referencing(
        &self,
        round_id: RoundId,
        reference_id: SpinId,
        spin_type: SpinType,
    ) -> Result<Option<Spin>> {
        let spins = self.find_spins_by_round_id(round_id).await?;
        Ok(spins
            .into_iter()
            .find(|s| s.spin_type == spin_type && s.reference_id == Some(reference_id)))
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}
