use crate::games::RefereeJob;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type TaskId = u64;

/// Closed set of deferred side effects
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    CreateTicketChannel,
    CloseTicket,
    PostDuelResult,
    SendLinkSuccessDm,
    SendDuelChallengeDm,
    SendDuelAcceptedDm,
    SendDuelStartedDm,
    AnnounceServerStatus,
    DispatchReferee,
    SettlePayout,
}

impl TaskType {
    pub const ALL: [TaskType; 10] = [
        TaskType::CreateTicketChannel,
        TaskType::CloseTicket,
        TaskType::PostDuelResult,
        TaskType::SendLinkSuccessDm,
        TaskType::SendDuelChallengeDm,
        TaskType::SendDuelAcceptedDm,
        TaskType::SendDuelStartedDm,
        TaskType::AnnounceServerStatus,
        TaskType::DispatchReferee,
        TaskType::SettlePayout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CreateTicketChannel => "CREATE_TICKET_CHANNEL",
            TaskType::CloseTicket => "CLOSE_TICKET",
            TaskType::PostDuelResult => "POST_DUEL_RESULT",
            TaskType::SendLinkSuccessDm => "SEND_LINK_SUCCESS_DM",
            TaskType::SendDuelChallengeDm => "SEND_DUEL_CHALLENGE_DM",
            TaskType::SendDuelAcceptedDm => "SEND_DUEL_ACCEPTED_DM",
            TaskType::SendDuelStartedDm => "SEND_DUEL_STARTED_DM",
            TaskType::AnnounceServerStatus => "ANNOUNCE_SERVER_STATUS",
            TaskType::DispatchReferee => "DISPATCH_REFEREE",
            TaskType::SettlePayout => "SETTLE_PAYOUT",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateTicketChannel {
    pub ticket_id: String,
    pub user_ref: String,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub subject: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloseTicket {
    pub ticket_id: String,
    pub channel_ref: String,
    pub closed_by: String,
    pub reason: String,
    /// Requester to notify; tickets opened by staff may have none
    #[serde(default)]
    pub user_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostDuelResult {
    pub duel_id: String,
    pub game_id: String,
    pub winner: String,
    pub loser: String,
    pub pot: u64,
    #[serde(default)]
    pub scores: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendLinkSuccessDm {
    pub recipient_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendDuelChallengeDm {
    pub recipient_ref: String,
    pub challenger: String,
    pub wager: u64,
    pub map: String,
    pub duel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendDuelAcceptedDm {
    pub recipient_ref: String,
    pub opponent: String,
    pub duel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendDuelStartedDm {
    pub recipient_ref: String,
    pub starter: String,
    pub server_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnounceServerStatus {
    pub region: String,
    pub status: String,
    #[serde(default)]
    pub silent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlePayout {
    /// Idempotency key for the external transfer
    pub duel_id: String,
    pub recipient_address: String,
    pub amount: Decimal,
    pub token: String,
}

/// Typed payload; the variant is the task type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "task_type", content = "fields", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPayload {
    CreateTicketChannel(CreateTicketChannel),
    CloseTicket(CloseTicket),
    PostDuelResult(PostDuelResult),
    SendLinkSuccessDm(SendLinkSuccessDm),
    SendDuelChallengeDm(SendDuelChallengeDm),
    SendDuelAcceptedDm(SendDuelAcceptedDm),
    SendDuelStartedDm(SendDuelStartedDm),
    AnnounceServerStatus(AnnounceServerStatus),
    DispatchReferee(RefereeJob),
    SettlePayout(SettlePayout),
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::CreateTicketChannel(_) => TaskType::CreateTicketChannel,
            TaskPayload::CloseTicket(_) => TaskType::CloseTicket,
            TaskPayload::PostDuelResult(_) => TaskType::PostDuelResult,
            TaskPayload::SendLinkSuccessDm(_) => TaskType::SendLinkSuccessDm,
            TaskPayload::SendDuelChallengeDm(_) => TaskType::SendDuelChallengeDm,
            TaskPayload::SendDuelAcceptedDm(_) => TaskType::SendDuelAcceptedDm,
            TaskPayload::SendDuelStartedDm(_) => TaskType::SendDuelStartedDm,
            TaskPayload::AnnounceServerStatus(_) => TaskType::AnnounceServerStatus,
            TaskPayload::DispatchReferee(_) => TaskType::DispatchReferee,
            TaskPayload::SettlePayout(_) => TaskType::SettlePayout,
        }
    }
}

/// Durable unit of at-least-once work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId, payload: TaskPayload) -> Self {
        Self {
            id,
            payload,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}
