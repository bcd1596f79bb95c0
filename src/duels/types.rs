use crate::games::GameKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type DuelId = String;
pub type ParticipantId = String;

/// Lifecycle of a wager match
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DuelStatus {
    Pending,
    Accepted,
    Started,
    AwaitingResult,
    PendingConfirmation,
    Disputed,
    Confirmed,
    Voided,
}

impl DuelStatus {
    /// Confirmed and voided duels never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, DuelStatus::Confirmed | DuelStatus::Voided)
    }

    /// Statuses in which both stakes sit in escrow
    pub fn holds_escrow(&self) -> bool {
        matches!(
            self,
            DuelStatus::Accepted
                | DuelStatus::Started
                | DuelStatus::AwaitingResult
                | DuelStatus::PendingConfirmation
                | DuelStatus::Disputed
        )
    }
}

impl fmt::Display for DuelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DuelStatus::Pending => "pending",
            DuelStatus::Accepted => "accepted",
            DuelStatus::Started => "started",
            DuelStatus::AwaitingResult => "awaiting_result",
            DuelStatus::PendingConfirmation => "pending_confirmation",
            DuelStatus::Disputed => "disputed",
            DuelStatus::Confirmed => "confirmed",
            DuelStatus::Voided => "voided",
        };
        write!(f, "{}", name)
    }
}

/// How the duel came to exist
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuelOrigin {
    Challenge,
    QuickMatch,
}

/// Opaque referee event, append-only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    pub recorded_at: DateTime<Utc>,
    pub event: serde_json::Value,
}

/// In-game usernames captured when the match started
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchIdentities {
    pub challenger: String,
    pub opponent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dispute {
    pub filed_by: ParticipantId,
    pub reason: String,
    pub video_evidence: bool,
    pub filed_at: DateTime<Utc>,
}

/// A wager contract between two participants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Duel {
    pub id: DuelId,
    pub game: GameKind,
    pub origin: DuelOrigin,
    pub challenger_id: ParticipantId,
    pub opponent_id: ParticipantId,
    pub wager: u64,
    pub pot: u64,
    /// Part of the escrow kept by the house on confirmation
    #[serde(default)]
    pub house_fee: u64,
    pub match_parameters: serde_json::Value,
    pub status: DuelStatus,
    pub winner_id: Option<ParticipantId>,
    pub loser_id: Option<ParticipantId>,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identities: Option<MatchIdentities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute: Option<Dispute>,
    /// Set when the duel needs an operator to look at it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
    /// Set exactly once, when the pot leaves escrow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Duel {
    pub fn is_participant(&self, participant: &str) -> bool {
        self.challenger_id == participant || self.opponent_id == participant
    }

    /// The other side of the duel, if `participant` is in it
    pub fn counterpart(&self, participant: &str) -> Option<&str> {
        if self.challenger_id == participant {
            Some(&self.opponent_id)
        } else if self.opponent_id == participant {
            Some(&self.challenger_id)
        } else {
            None
        }
    }

    /// Total escrowed: what a refund must return
    pub fn escrowed(&self) -> u64 {
        self.pot + self.house_fee
    }

    pub(crate) fn append_transcript(&mut self, entries: Vec<TranscriptEntry>) {
        self.transcript.extend(entries);
    }
}
