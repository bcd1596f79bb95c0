//! Per-game strategy contract
//!
//! One implementation per supported game. Handlers are pure: they never touch
//! balances, stores or the network, so the state machine can call them while
//! holding the per-duel lock.

use super::types::{AllocatedServer, GameError, GameKind, MatchResolution, RefereeJob};
use crate::duels::{Duel, ParticipantId, TranscriptEntry};
use chrono::Utc;
use serde_json::Value;

pub trait GameHandler: Send + Sync {
    fn kind(&self) -> GameKind;

    /// Check match parameters against the game's rule schema.
    fn validate_parameters(&self, parameters: &Value) -> Result<(), GameError>;

    /// Region the match must be hosted in
    fn region(&self, parameters: &Value) -> Result<String, GameError>;

    /// One-line description used in challenge notifications (map, format, ...)
    fn summary(&self, parameters: &Value) -> String;

    /// Build the referee payload. Must not mutate the duel.
    fn create_match_task(
        &self,
        duel: &Duel,
        server: &AllocatedServer,
        challenger_identity: &str,
        opponent_identity: &str,
    ) -> Result<RefereeJob, GameError>;

    /// Map a referee payload back onto the duel's participants.
    ///
    /// Returns `MissingIdentity` when the duel carries no captured identities;
    /// callers treat that as "not yet resolvable", never as a loss.
    fn process_match_result(&self, duel: &Duel, result: &Value)
        -> Result<MatchResolution, GameError>;
}

/// Resolve a reported in-game username to `(winner, loser)`.
///
/// Matching is case-insensitive and exact against both captured identities.
/// A missing report or a name matching neither side resolves to `(None, None)`.
pub fn resolve_reported_winner(
    duel: &Duel,
    reported: Option<&str>,
) -> Result<(Option<ParticipantId>, Option<ParticipantId>), GameError> {
    let identities = duel.identities.as_ref().ok_or_else(|| {
        GameError::MissingIdentity(format!("duel {} has no recorded player identities", duel.id))
    })?;

    let reported = match reported.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return Ok((None, None)),
    };

    if reported.eq_ignore_ascii_case(identities.challenger.trim()) {
        Ok((Some(duel.challenger_id.clone()), Some(duel.opponent_id.clone())))
    } else if reported.eq_ignore_ascii_case(identities.opponent.trim()) {
        Ok((Some(duel.opponent_id.clone()), Some(duel.challenger_id.clone())))
    } else {
        Ok((None, None))
    }
}

/// Turn a referee event array into transcript entries
pub fn transcript_from(events: Option<&Value>) -> Vec<TranscriptEntry> {
    let recorded_at = Utc::now();
    match events {
        Some(Value::Array(items)) => items
            .iter()
            .cloned()
            .map(|event| TranscriptEntry { recorded_at, event })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![TranscriptEntry {
            recorded_at,
            event: other.clone(),
        }],
    }
}

/// Read an optional string field, treating blanks as absent
pub(crate) fn optional_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(crate) fn require_object(parameters: &Value) -> Result<(), GameError> {
    if parameters.is_object() {
        Ok(())
    } else {
        Err(GameError::InvalidParameters(
            "Match parameters must be an object".to_string(),
        ))
    }
}
