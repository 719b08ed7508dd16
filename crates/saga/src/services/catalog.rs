//! Game catalog lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::GameId;
use domain::Game;
use tokio::sync::RwLock;

use crate::error::Result;

/// Read access to the game catalog.
#[async_trait]
pub trait GameCatalog: Send + Sync {
    /// Returns the game if `aggregator` offers it.
    async fn find_game(&self, aggregator: &str, game_id: GameId) -> Result<Option<Game>>;
}

/// In-memory game catalog for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGameCatalog {
    games: Arc<RwLock<HashMap<GameId, Game>>>,
}

impl InMemoryGameCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a game.
    pub async fn add_game(&self, game: Game) {
        self.games.write().await.insert(game.id, game);
    }
}

#[async_trait]
impl GameCatalog for InMemoryGameCatalog {
    async fn find_game(&self, aggregator: &str, game_id: GameId) -> Result<Option<Game>> {
        Ok(self
            .games
            .read()
            .await
            .get(&game_id)
            .filter(|g| g.aggregator == aggregator)
            .cloned())
    }
}
