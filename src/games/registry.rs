use super::arena::ArenaHandler;
use super::handler::GameHandler;
use super::sumo::SumoHandler;
use super::types::{GameError, GameKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Game handlers keyed by game, built once at startup
#[derive(Clone, Default)]
pub struct GameRegistry {
    handlers: HashMap<GameKind, Arc<dyn GameHandler>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in game
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ArenaHandler::new()));
        registry.register(Arc::new(SumoHandler::new()));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn GameHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, game: GameKind) -> Result<Arc<dyn GameHandler>, GameError> {
        self.handlers
            .get(&game)
            .cloned()
            .ok_or_else(|| GameError::UnsupportedGame(game.to_string()))
    }

    pub fn games(&self) -> Vec<GameKind> {
        let mut games: Vec<GameKind> = self.handlers.keys().copied().collect();
        games.sort_by_key(|g| g.to_string());
        games
    }
}
