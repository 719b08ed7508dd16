//! Round entity.

use chrono::{DateTime, Utc};
use common::{GameId, RoundId, SessionId};
use serde::{Deserialize, Serialize};

/// One play cycle within a session.
///
/// Unique by `(session_id, ext_round_id)`. Rows are never mutated except for
/// the `finished` flag, which is set once and is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub session_id: SessionId,
    pub game_id: GameId,
    /// Round id supplied by the aggregator.
    pub ext_round_id: String,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn new(session_id: SessionId, game_id: GameId, ext_round_id: impl Into<String>) -> Self {
        Self {
            id: RoundId::new(),
            session_id,
            game_id,
            ext_round_id: ext_round_id.into(),
            finished: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Marks the round finished.
    ///
    /// Returns false when it was already finished; the original timestamp is kept.
    pub fn finish(&mut self, at: DateTime<Utc>) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.finished_at = Some(at);
        true
    }

    /// Returns true if this round is identified by the given external key.
    pub fn matches(&self, session_id: SessionId, ext_round_id: &str) -> bool {
        self.session_id == session_id && self.ext_round_id == ext_round_id
    }
}
