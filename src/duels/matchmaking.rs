//! Quick-match queue
//!
//! Entries pair first-come first-served on (game, wager, region). A pair
//! becomes a duel that skips the challenge step and starts out accepted.

use super::machine::{DuelError, DuelService};
use super::types::{Duel, ParticipantId};
use crate::games::GameKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueEntry {
    pub participant_id: ParticipantId,
    pub game: GameKind,
    pub wager: u64,
    pub match_parameters: Value,
    pub region: String,
    pub queued_at: DateTime<Utc>,
}

impl QueueEntry {
    fn pairs_with(&self, other: &QueueEntry) -> bool {
        self.participant_id != other.participant_id
            && self.game == other.game
            && self.wager == other.wager
            && self.region == other.region
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueOutcome {
    /// 1-based position among entries waiting
    Waiting { position: usize },
    AlreadyQueued { position: usize },
    Matched(Duel),
}

pub struct Matchmaker {
    duels: Arc<DuelService>,
    queue: Mutex<Vec<QueueEntry>>,
}

impl Matchmaker {
    pub fn new(duels: Arc<DuelService>) -> Self {
        Self {
            duels,
            queue: Mutex::new(Vec::new()),
        }
    }

    pub async fn join(
        &self,
        participant: &str,
        game: GameKind,
        wager: u64,
        match_parameters: Value,
    ) -> Result<QueueOutcome, DuelError> {
        let region = self
            .duels
            .validate_queue_entry(participant, game, wager, &match_parameters)?;
        let entry = QueueEntry {
            participant_id: participant.to_string(),
            game,
            wager,
            match_parameters,
            region,
            queued_at: Utc::now(),
        };

        let mut queue = self.queue.lock().await;
        if let Some(index) = queue.iter().position(|e| e.participant_id == participant) {
            return Ok(QueueOutcome::AlreadyQueued { position: index + 1 });
        }

        while let Some(index) = queue.iter().position(|waiting| waiting.pairs_with(&entry)) {
            let waiting = queue.remove(index);
            match self.duels.create_quick_match(&waiting, &entry).await {
                Ok(duel) => {
                    info!(duel_id = %duel.id, first = %waiting.participant_id, second = %participant, "Queue pair matched");
                    return Ok(QueueOutcome::Matched(duel));
                }
                Err(DuelError::InsufficientBalance { participant: broke, .. })
                    if broke == waiting.participant_id =>
                {
                    warn!(participant = %broke, "Dropping queue entry that can no longer cover its wager");
                }
                Err(e) => {
                    queue.insert(index, waiting);
                    return Err(e);
                }
            }
        }

        queue.push(entry);
        info!(%participant, %game, wager, "Joined quick-match queue");
        Ok(QueueOutcome::Waiting {
            position: queue.len(),
        })
    }

    /// Returns false if the participant was not queued
    pub async fn leave(&self, participant: &str) -> bool {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|e| e.participant_id != participant);
        before != queue.len()
    }

    pub async fn waiting(&self) -> Vec<QueueEntry> {
        self.queue.lock().await.clone()
    }
}
