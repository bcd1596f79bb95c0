//! Sumo: push-out rounds, best-of-N in a chosen region

use super::handler::{optional_str, require_object, resolve_reported_winner, transcript_from, GameHandler};
use super::types::{AllocatedServer, GameError, GameKind, MatchResolution, RefereeJob};
use crate::duels::Duel;
use serde_json::{json, Value};

pub const SUMO_REGIONS: [&str; 3] = ["na", "eu", "asia"];
const DEFAULT_ROUNDS: u64 = 3;
const MAX_ROUNDS: u64 = 9;

#[derive(Debug, Default)]
pub struct SumoHandler;

impl SumoHandler {
    pub fn new() -> Self {
        Self
    }

    fn rounds(parameters: &Value) -> Result<u64, GameError> {
        match parameters.get("rounds") {
            None | Some(Value::Null) => Ok(DEFAULT_ROUNDS),
            Some(value) => {
                let rounds = value.as_u64().ok_or_else(|| {
                    GameError::InvalidParameters("Rounds must be a whole number".to_string())
                })?;
                if rounds == 0 || rounds > MAX_ROUNDS || rounds % 2 == 0 {
                    return Err(GameError::InvalidParameters(format!(
                        "Rounds must be an odd number between 1 and {}",
                        MAX_ROUNDS
                    )));
                }
                Ok(rounds)
            }
        }
    }
}

impl GameHandler for SumoHandler {
    fn kind(&self) -> GameKind {
        GameKind::Sumo
    }

    fn validate_parameters(&self, parameters: &Value) -> Result<(), GameError> {
        require_object(parameters)?;
        self.region(parameters)?;
        Self::rounds(parameters)?;
        Ok(())
    }

    fn region(&self, parameters: &Value) -> Result<String, GameError> {
        let region = optional_str(parameters, "region")
            .ok_or_else(|| GameError::InvalidParameters("A region must be selected".to_string()))?
            .to_lowercase();
        if !SUMO_REGIONS.contains(&region.as_str()) {
            return Err(GameError::InvalidParameters(format!(
                "Unknown region '{}'. Choose one of: {}",
                region,
                SUMO_REGIONS.join(", ")
            )));
        }
        Ok(region)
    }

    fn summary(&self, parameters: &Value) -> String {
        let rounds = Self::rounds(parameters).unwrap_or(DEFAULT_ROUNDS);
        format!("best of {}", rounds)
    }

    fn create_match_task(
        &self,
        duel: &Duel,
        server: &AllocatedServer,
        challenger_identity: &str,
        opponent_identity: &str,
    ) -> Result<RefereeJob, GameError> {
        let rounds = Self::rounds(&duel.match_parameters)?;

        Ok(RefereeJob {
            duel_id: duel.id.clone(),
            game: GameKind::Sumo,
            server_link: server.link.clone(),
            challenger_username: challenger_identity.to_string(),
            opponent_username: opponent_identity.to_string(),
            wager: duel.wager,
            rules: json!({
                "region": server.region,
                "rounds": rounds,
            }),
        })
    }

    fn process_match_result(&self, duel: &Duel, result: &Value) -> Result<MatchResolution, GameError> {
        if !(result.is_object() || result.is_null()) {
            return Err(GameError::MalformedResult(
                "sumo result must be an object".to_string(),
            ));
        }

        let (winner_id, loser_id) =
            resolve_reported_winner(duel, optional_str(result, "winner_username"))?;

        Ok(MatchResolution {
            winner_id,
            loser_id,
            transcript: transcript_from(result.get("rounds")),
            scores: result.get("score").filter(|s| !s.is_null()).cloned(),
        })
    }
}
