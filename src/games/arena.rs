//! Arena: 1v1 shooter on a chosen map, optional item bans

use super::handler::{optional_str, require_object, resolve_reported_winner, transcript_from, GameHandler};
use super::types::{AllocatedServer, GameError, GameKind, MatchResolution, RefereeJob};
use crate::duels::Duel;
use serde_json::{json, Value};

pub const ARENA_MAPS: [&str; 5] = ["crossroads", "docks", "foundry", "rooftops", "temple"];
pub const ARENA_REGIONS: [&str; 4] = ["na-east", "na-west", "eu", "asia"];
const MAX_BANNED_ITEMS: usize = 5;

#[derive(Debug, Default)]
pub struct ArenaHandler;

impl ArenaHandler {
    pub fn new() -> Self {
        Self
    }

    fn banned_items(parameters: &Value) -> Result<Vec<String>, GameError> {
        match parameters.get("banned_items") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| {
                            GameError::InvalidParameters(
                                "Banned items must be non-empty item names".to_string(),
                            )
                        })
                })
                .collect(),
            Some(_) => Err(GameError::InvalidParameters(
                "Banned items must be a list".to_string(),
            )),
        }
    }
}

impl GameHandler for ArenaHandler {
    fn kind(&self) -> GameKind {
        GameKind::Arena
    }

    fn validate_parameters(&self, parameters: &Value) -> Result<(), GameError> {
        require_object(parameters)?;

        let map = optional_str(parameters, "map")
            .ok_or_else(|| GameError::InvalidParameters("A map must be selected".to_string()))?;
        if !ARENA_MAPS.iter().any(|m| m.eq_ignore_ascii_case(map)) {
            return Err(GameError::InvalidParameters(format!(
                "Unknown map '{}'. Choose one of: {}",
                map,
                ARENA_MAPS.join(", ")
            )));
        }

        self.region(parameters)?;

        let banned = Self::banned_items(parameters)?;
        if banned.len() > MAX_BANNED_ITEMS {
            return Err(GameError::InvalidParameters(format!(
                "At most {} items can be banned",
                MAX_BANNED_ITEMS
            )));
        }
        Ok(())
    }

    fn region(&self, parameters: &Value) -> Result<String, GameError> {
        let region = optional_str(parameters, "region")
            .ok_or_else(|| GameError::InvalidParameters("A region must be selected".to_string()))?
            .to_lowercase();
        if !ARENA_REGIONS.contains(&region.as_str()) {
            return Err(GameError::InvalidParameters(format!(
                "Unknown region '{}'. Choose one of: {}",
                region,
                ARENA_REGIONS.join(", ")
            )));
        }
        Ok(region)
    }

    fn summary(&self, parameters: &Value) -> String {
        optional_str(parameters, "map")
            .map(str::to_lowercase)
            .unwrap_or_else(|| "any map".to_string())
    }

    fn create_match_task(
        &self,
        duel: &Duel,
        server: &AllocatedServer,
        challenger_identity: &str,
        opponent_identity: &str,
    ) -> Result<RefereeJob, GameError> {
        let map = optional_str(&duel.match_parameters, "map")
            .ok_or_else(|| GameError::InvalidParameters("A map must be selected".to_string()))?
            .to_lowercase();
        let banned_items = Self::banned_items(&duel.match_parameters)?;

        Ok(RefereeJob {
            duel_id: duel.id.clone(),
            game: GameKind::Arena,
            server_link: server.link.clone(),
            challenger_username: challenger_identity.to_string(),
            opponent_username: opponent_identity.to_string(),
            wager: duel.wager,
            rules: json!({
                "map": map,
                "region": server.region,
                "banned_items": banned_items,
            }),
        })
    }

    fn process_match_result(&self, duel: &Duel, result: &Value) -> Result<MatchResolution, GameError> {
        if !(result.is_object() || result.is_null()) {
            return Err(GameError::MalformedResult(
                "arena result must be an object".to_string(),
            ));
        }

        let (winner_id, loser_id) = resolve_reported_winner(duel, optional_str(result, "winner"))?;

        Ok(MatchResolution {
            winner_id,
            loser_id,
            transcript: transcript_from(result.get("events")),
            scores: result.get("scores").filter(|s| !s.is_null()).cloned(),
        })
    }
}
