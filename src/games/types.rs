use crate::duels::{DuelId, ParticipantId, TranscriptEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported game types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Arena,
    Sumo,
}

impl GameKind {
    pub const ALL: [GameKind; 2] = [GameKind::Arena, GameKind::Sumo];

    /// Feature flag gating new duels for this game
    pub fn flag_key(&self) -> String {
        format!("game:{}", self)
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::Arena => write!(f, "arena"),
            GameKind::Sumo => write!(f, "sumo"),
        }
    }
}

impl FromStr for GameKind {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "arena" => Ok(GameKind::Arena),
            "sumo" => Ok(GameKind::Sumo),
            other => Err(GameError::UnsupportedGame(other.to_string())),
        }
    }
}

/// Private server handed out for one match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocatedServer {
    pub region: String,
    pub link: String,
}

/// Exactly what the external referee needs to run and observe a match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefereeJob {
    pub duel_id: DuelId,
    pub game: GameKind,
    pub server_link: String,
    pub challenger_username: String,
    pub opponent_username: String,
    pub wager: u64,
    pub rules: serde_json::Value,
}

/// Referee outcome mapped back onto the duel's participants
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResolution {
    pub winner_id: Option<ParticipantId>,
    pub loser_id: Option<ParticipantId>,
    pub transcript: Vec<TranscriptEntry>,
    pub scores: Option<serde_json::Value>,
}

impl MatchResolution {
    pub fn is_resolved(&self) -> bool {
        self.winner_id.is_some() && self.loser_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("Unsupported game: {0}")]
    UnsupportedGame(String),

    #[error("{0}")]
    InvalidParameters(String),

    #[error("Result not yet resolvable: {0}")]
    MissingIdentity(String),

    #[error("Malformed referee result: {0}")]
    MalformedResult(String),
}
