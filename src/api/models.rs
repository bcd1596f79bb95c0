//! API Request and Response Models

use crate::duels::{Duel, QueueOutcome, ResultOutcome, TransitionOutcome};
use crate::games::{GameKind, RefereeJob};
use crate::settlement::PayoutRequest;
use crate::tasks::Task;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub dispatcher_enabled: bool,
    pub settlement_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecheckResponse {
    pub eligible: bool,
}

/// Body for participant actions: accept, decline, start, confirm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRequest {
    pub participant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeRequest {
    pub participant_id: String,
    pub reason: String,
    #[serde(default)]
    pub video_evidence: bool,
}

/// Outcome of a transition. `applied = false` means another actor got there
/// first and `duel` is the current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub applied: bool,
    pub duel: Duel,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            applied: outcome.is_applied(),
            duel: outcome.into_duel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultResponse {
    /// resolved, unresolved or already_resolved
    pub outcome: String,
    pub duel: Duel,
}

impl From<ResultOutcome> for ResultResponse {
    fn from(outcome: ResultOutcome) -> Self {
        let (label, duel) = match outcome {
            ResultOutcome::Resolved(duel) => ("resolved", duel),
            ResultOutcome::Unresolved(duel) => ("unresolved", duel),
            ResultOutcome::AlreadyResolved(duel) => ("already_resolved", duel),
        };
        Self {
            outcome: label.to_string(),
            duel,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub game: Option<GameKind>,
    #[serde(default = "default_job_limit")]
    pub limit: usize,
}

fn default_job_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsResponse {
    pub jobs: Vec<RefereeJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJoinRequest {
    pub participant_id: String,
    pub game: GameKind,
    pub wager: u64,
    #[serde(default)]
    pub match_parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJoinResponse {
    /// waiting, already_queued or matched
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duel: Option<Duel>,
}

impl From<QueueOutcome> for QueueJoinResponse {
    fn from(outcome: QueueOutcome) -> Self {
        match outcome {
            QueueOutcome::Waiting { position } => Self {
                status: "waiting".to_string(),
                position: Some(position),
                duel: None,
            },
            QueueOutcome::AlreadyQueued { position } => Self {
                status: "already_queued".to_string(),
                position: Some(position),
                duel: None,
            },
            QueueOutcome::Matched(duel) => Self {
                status: "matched".to_string(),
                position: None,
                duel: Some(duel),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueLeaveResponse {
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkAccountRequest {
    pub participant_id: String,
    pub game: GameKind,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkAccountResponse {
    /// false when the same username was already linked
    pub linked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutAddressRequest {
    pub participant_id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub participant_id: String,
    pub balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingTasksQuery {
    #[serde(default = "default_task_limit")]
    pub limit: usize,
}

fn default_task_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksResponse {
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoidRequest {
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub winner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatusRequest {
    pub region: String,
    pub status: String,
    #[serde(default)]
    pub silent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatusResponse {
    pub region: String,
    pub status: String,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutsResponse {
    pub payouts: Vec<PayoutRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagUpdateRequest {
    pub key: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagsResponse {
    pub flags: HashMap<String, bool>,
}
