//! Game-launch session and catalog entries.

use common::{GameId, PlayerId, SessionId};
use serde::{Deserialize, Serialize};

use crate::money::Currency;

/// Player/game/currency identity for one game launch.
///
/// Read-only for the duration of a saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub player_id: PlayerId,
    pub game_id: GameId,
    /// Aggregator that launched the game.
    pub aggregator: String,
    pub currency: Currency,
}

impl Session {
    pub fn new(
        player_id: PlayerId,
        game_id: GameId,
        aggregator: impl Into<String>,
        currency: impl Into<Currency>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            player_id,
            game_id,
            aggregator: aggregator.into(),
            currency: currency.into(),
        }
    }
}

/// A game as known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub aggregator: String,
    pub name: String,
    /// False when the game is disabled or under maintenance.
    pub playable: bool,
}

impl Game {
    pub fn new(id: GameId, aggregator: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            aggregator: aggregator.into(),
            name: name.into(),
            playable: true,
        }
    }

    /// Returns a copy of this game with the playable flag set.
    pub fn with_playable(mut self, playable: bool) -> Self {
        self.playable = playable;
        self
    }
}
