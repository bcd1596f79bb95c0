//! Linked game accounts and payout addresses
//!
//! A participant links one username per game. Usernames are unique per game,
//! compared case-insensitively, since the referee reports winners by username.

use crate::duels::ParticipantId;
use crate::games::GameKind;
use crate::settlement::is_valid_address;
use crate::tasks::{SendLinkSuccessDm, TaskPayload, TaskStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{error, info};

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Username must be 3-32 letters, digits or underscores: {0}")]
    InvalidUsername(String),

    #[error("{username} is already linked to another account for {game}")]
    UsernameTaken { username: String, game: GameKind },

    #[error("Invalid payout address: {0}")]
    InvalidAddress(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// Same username was already linked; nothing changed
    Unchanged,
}

pub struct IdentityDirectory {
    usernames: DashMap<(ParticipantId, GameKind), String>,
    owners: DashMap<(GameKind, String), ParticipantId>,
    payout_addresses: DashMap<ParticipantId, String>,
    tasks: Arc<dyn TaskStore>,
}

fn validate_username(username: &str) -> Result<String, IdentityError> {
    let username = username.trim();
    let valid_len = (MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username.len());
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_len && valid_chars {
        Ok(username.to_string())
    } else {
        Err(IdentityError::InvalidUsername(username.to_string()))
    }
}

impl IdentityDirectory {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self {
            usernames: DashMap::new(),
            owners: DashMap::new(),
            payout_addresses: DashMap::new(),
            tasks,
        }
    }

    /// Link `username` for `game`, replacing any earlier link.
    ///
    /// A new link queues the success DM; relinking the same name does not.
    pub async fn link_account(
        &self,
        participant: &str,
        game: GameKind,
        username: &str,
    ) -> Result<LinkOutcome, IdentityError> {
        let username = validate_username(username)?;
        let owner_key = (game, username.to_lowercase());

        match self.owners.entry(owner_key) {
            Entry::Occupied(owner) if owner.get() != participant => {
                return Err(IdentityError::UsernameTaken { username, game });
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(participant.to_string());
            }
        }

        let previous = self
            .usernames
            .insert((participant.to_string(), game), username.clone());
        if let Some(previous) = &previous {
            if previous.eq_ignore_ascii_case(&username) {
                if previous == &username {
                    return Ok(LinkOutcome::Unchanged);
                }
            } else {
                self.owners.remove(&(game, previous.to_lowercase()));
            }
        }

        info!(participant, %game, %username, "Account linked");
        let dm = TaskPayload::SendLinkSuccessDm(SendLinkSuccessDm {
            recipient_ref: participant.to_string(),
        });
        if let Err(e) = self.tasks.enqueue(dm).await {
            error!(participant, error = %e, "Failed to queue link confirmation");
        }
        Ok(LinkOutcome::Linked)
    }

    pub fn username(&self, participant: &str, game: GameKind) -> Option<String> {
        self.usernames
            .get(&(participant.to_string(), game))
            .map(|u| u.value().clone())
    }

    pub fn set_payout_address(&self, participant: &str, address: &str) -> Result<(), IdentityError> {
        let address = address.trim();
        if !is_valid_address(address) {
            return Err(IdentityError::InvalidAddress(address.to_string()));
        }
        self.payout_addresses
            .insert(participant.to_string(), address.to_string());
        Ok(())
    }

    pub fn payout_address(&self, participant: &str) -> Option<String> {
        self.payout_addresses
            .get(participant)
            .map(|a| a.value().clone())
    }
}
