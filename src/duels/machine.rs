//! Duel state machine
//!
//! ```text
//! pending -> accepted -> started -> awaiting_result -> pending_confirmation -> confirmed
//!    |          |           |             |                    |
//!    v          +-----------+-------------+--------> voided    +-> disputed -> confirmed | voided
//!  voided
//! ```
//!
//! Every transition for a duel runs under that duel's lock: load, check,
//! apply the ledger batch, persist. If persisting fails the ledger batch is
//! reversed, so status and balances move together. Follow-up tasks are queued
//! after the commit, still under the lock, which keeps one duel's side effects
//! in transition order.

use super::matchmaking::QueueEntry;
use super::store::DuelStore;
use super::types::{
    Dispute, Duel, DuelId, DuelOrigin, DuelStatus, MatchIdentities, ParticipantId,
};
use crate::config::DuelsConfig;
use crate::errors::StorageError;
use crate::flags::{FeatureFlags, PAYOUTS_FLAG};
use crate::games::{GameError, GameHandler, GameKind, GameRegistry};
use crate::identity::IdentityDirectory;
use crate::ledger::{Ledger, LedgerEntry, LedgerError, HOUSE_ACCOUNT};
use crate::metrics::Metrics;
use crate::servers::{AllocationError, ServerAllocator};
use crate::tasks::{
    CreateTicketChannel, PostDuelResult, SendDuelAcceptedDm, SendDuelChallengeDm,
    SendDuelStartedDm, SettlePayout, TaskPayload, TaskStore,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DuelError {
    #[error("{0}")]
    Validation(String),

    #[error("{participant} has {available} available but the wager needs {required}")]
    InsufficientBalance {
        participant: String,
        available: u64,
        required: u64,
    },

    #[error("{participant} is not part of duel {duel_id}")]
    NotParticipant { duel_id: DuelId, participant: String },

    #[error("Cannot {action} duel {duel_id} while it is {status}")]
    InvalidTransition {
        duel_id: DuelId,
        status: DuelStatus,
        action: &'static str,
    },

    #[error("Duel not found: {0}")]
    NotFound(DuelId),

    #[error("{0}")]
    MissingIdentity(String),

    #[error("{0} duels are currently disabled")]
    GameDisabled(GameKind),

    #[error("No server available: {0}")]
    ServerUnavailable(#[from] AllocationError),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<LedgerError> for DuelError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance {
                account,
                available,
                required,
            } => DuelError::InsufficientBalance {
                participant: account,
                available,
                required,
            },
            other => DuelError::Ledger(other),
        }
    }
}

/// Result of a user or admin action
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Duel),
    /// Someone got there first; carries the current duel
    AlreadyTaken(Duel),
}

impl TransitionOutcome {
    pub fn duel(&self) -> &Duel {
        match self {
            TransitionOutcome::Applied(duel) | TransitionOutcome::AlreadyTaken(duel) => duel,
        }
    }

    pub fn into_duel(self) -> Duel {
        match self {
            TransitionOutcome::Applied(duel) | TransitionOutcome::AlreadyTaken(duel) => duel,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutcome {
    /// Winner and loser known, awaiting confirmation
    Resolved(Duel),
    /// Flagged for manual review, still awaiting a result
    Unresolved(Duel),
    /// A result was already applied; nothing changed
    AlreadyResolved(Duel),
}

impl ResultOutcome {
    pub fn duel(&self) -> &Duel {
        match self {
            ResultOutcome::Resolved(duel)
            | ResultOutcome::Unresolved(duel)
            | ResultOutcome::AlreadyResolved(duel) => duel,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecheckRequest {
    pub challenger_id: ParticipantId,
    pub opponent_id: ParticipantId,
    pub game: GameKind,
    pub wager: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChallenge {
    pub challenger_id: ParticipantId,
    pub opponent_id: ParticipantId,
    pub game: GameKind,
    pub wager: u64,
    #[serde(default)]
    pub match_parameters: Value,
}

impl NewChallenge {
    fn precheck(&self) -> PrecheckRequest {
        PrecheckRequest {
            challenger_id: self.challenger_id.clone(),
            opponent_id: self.opponent_id.clone(),
            game: self.game,
            wager: self.wager,
        }
    }
}

/// How confirmed pots leave the platform
#[derive(Debug, Clone)]
pub struct PayoutPolicy {
    /// Send pots to the winner's payout address when they have one
    pub auto_payout: bool,
    pub token: String,
    pub units_per_token: u64,
}

impl PayoutPolicy {
    pub fn internal_only() -> Self {
        Self {
            auto_payout: false,
            token: "USDC".to_string(),
            units_per_token: 100,
        }
    }

    fn amount(&self, units: u64) -> Decimal {
        Decimal::from(units) / Decimal::from(self.units_per_token.max(1))
    }
}

/// Collaborators the state machine drives
pub struct DuelServiceParts {
    pub store: Arc<dyn DuelStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub ledger: Arc<Ledger>,
    pub games: GameRegistry,
    pub identities: Arc<IdentityDirectory>,
    pub servers: Arc<dyn ServerAllocator>,
    pub flags: Arc<FeatureFlags>,
    pub metrics: Arc<Metrics>,
    pub config: DuelsConfig,
    pub payouts: PayoutPolicy,
}

pub struct DuelService {
    store: Arc<dyn DuelStore>,
    tasks: Arc<dyn TaskStore>,
    ledger: Arc<Ledger>,
    games: GameRegistry,
    identities: Arc<IdentityDirectory>,
    servers: Arc<dyn ServerAllocator>,
    flags: Arc<FeatureFlags>,
    metrics: Arc<Metrics>,
    config: DuelsConfig,
    payouts: PayoutPolicy,
    locks: DashMap<DuelId, Arc<Mutex<()>>>,
}

/// Exclusive hold on one duel. The map entry goes away with the last holder,
/// so the map only tracks duels that are being worked on.
struct DuelGuard<'a> {
    locks: &'a DashMap<DuelId, Arc<Mutex<()>>>,
    id: DuelId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DuelGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are only handed out under the entry's shard lock, so a count
        // of one here means no caller is holding or waiting on this mutex.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn reversed(entries: &[LedgerEntry]) -> Vec<LedgerEntry> {
    entries
        .iter()
        .rev()
        .map(|entry| match entry {
            LedgerEntry::Debit { account, amount } => LedgerEntry::credit(account.clone(), *amount),
            LedgerEntry::Credit { account, amount } => LedgerEntry::debit(account.clone(), *amount),
        })
        .collect()
}

fn escrow_entries(duel: &Duel) -> Vec<LedgerEntry> {
    vec![
        LedgerEntry::debit(duel.challenger_id.clone(), duel.wager),
        LedgerEntry::debit(duel.opponent_id.clone(), duel.wager),
    ]
}

fn refund_entries(duel: &Duel) -> Vec<LedgerEntry> {
    vec![
        LedgerEntry::credit(duel.challenger_id.clone(), duel.wager),
        LedgerEntry::credit(duel.opponent_id.clone(), duel.wager),
    ]
}

impl DuelService {
    pub fn new(parts: DuelServiceParts) -> Self {
        Self {
            store: parts.store,
            tasks: parts.tasks,
            ledger: parts.ledger,
            games: parts.games,
            identities: parts.identities,
            servers: parts.servers,
            flags: parts.flags,
            metrics: parts.metrics,
            config: parts.config,
            payouts: parts.payouts,
            locks: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn games(&self) -> &GameRegistry {
        &self.games
    }

    async fn lock_duel(&self, id: &str) -> DuelGuard<'_> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        DuelGuard {
            locks: &self.locks,
            id: id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    async fn load(&self, id: &str) -> Result<Duel, DuelError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DuelError::NotFound(id.to_string()))
    }

    pub async fn get(&self, id: &str) -> Result<Duel, DuelError> {
        self.load(id).await
    }

    pub async fn list_by_status(&self, statuses: &[DuelStatus]) -> Result<Vec<Duel>, DuelError> {
        Ok(self.store.list_by_status(statuses).await?)
    }

    /// Apply the ledger batch and persist the duel, or neither.
    async fn commit(&self, duel: &mut Duel, entries: &[LedgerEntry]) -> Result<(), DuelError> {
        duel.updated_at = Utc::now();
        self.ledger.apply(entries)?;

        if let Err(e) = self.store.update(duel).await {
            if let Err(undo) = self.ledger.apply(&reversed(entries)) {
                error!(duel_id = %duel.id, error = %undo, "Failed to reverse ledger batch after store failure");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Queue follow-up tasks. The transition is already committed, so a
    /// failure here is logged, not returned.
    async fn emit(&self, duel_id: &str, payloads: Vec<TaskPayload>) {
        for payload in payloads {
            let task_type = payload.task_type();
            if let Err(e) = self.tasks.enqueue(payload).await {
                error!(%duel_id, %task_type, error = %e, "Failed to queue duel task");
            }
        }
    }

    fn require_participant(duel: &Duel, participant: &str) -> Result<(), DuelError> {
        if duel.is_participant(participant) {
            Ok(())
        } else {
            Err(DuelError::NotParticipant {
                duel_id: duel.id.clone(),
                participant: participant.to_string(),
            })
        }
    }

    fn invalid(duel: &Duel, action: &'static str) -> DuelError {
        DuelError::InvalidTransition {
            duel_id: duel.id.clone(),
            status: duel.status,
            action,
        }
    }

    fn check_wager(&self, wager: u64) -> Result<(), DuelError> {
        if wager < self.config.min_wager || wager > self.config.max_wager {
            return Err(DuelError::Validation(format!(
                "Wager must be between {} and {}",
                self.config.min_wager, self.config.max_wager
            )));
        }
        Ok(())
    }

    fn check_game(&self, game: GameKind) -> Result<Arc<dyn GameHandler>, DuelError> {
        if !self.flags.is_enabled(&game.flag_key()) {
            return Err(DuelError::GameDisabled(game));
        }
        Ok(self.games.get(game)?)
    }

    fn check_linked(&self, participant: &str, game: GameKind) -> Result<String, DuelError> {
        self.identities.username(participant, game).ok_or_else(|| {
            DuelError::Validation(format!(
                "{} has not linked a {} account",
                participant, game
            ))
        })
    }

    fn check_balance(&self, participant: &str, wager: u64) -> Result<(), DuelError> {
        let available = self.ledger.balance(participant);
        if available < wager {
            return Err(DuelError::InsufficientBalance {
                participant: participant.to_string(),
                available,
                required: wager,
            });
        }
        Ok(())
    }

    /// Can these two participants duel for this wager right now?
    pub fn precheck(&self, request: &PrecheckRequest) -> Result<(), DuelError> {
        if request.challenger_id == request.opponent_id {
            return Err(DuelError::Validation("You cannot challenge yourself".to_string()));
        }
        self.check_wager(request.wager)?;
        self.check_game(request.game)?;
        for participant in [&request.challenger_id, &request.opponent_id] {
            self.check_linked(participant, request.game)?;
            self.check_balance(participant, request.wager)?;
        }
        Ok(())
    }

    /// Submit a validated challenge. Nothing is escrowed until acceptance.
    pub async fn create_challenge(&self, request: NewChallenge) -> Result<Duel, DuelError> {
        self.precheck(&request.precheck())?;
        let handler = self.games.get(request.game)?;
        handler.validate_parameters(&request.match_parameters)?;

        let pot = request
            .wager
            .checked_mul(2)
            .ok_or_else(|| DuelError::Validation("Wager is too large".to_string()))?;
        let now = Utc::now();
        let duel = Duel {
            id: Uuid::new_v4().to_string(),
            game: request.game,
            origin: DuelOrigin::Challenge,
            challenger_id: request.challenger_id,
            opponent_id: request.opponent_id,
            wager: request.wager,
            pot,
            house_fee: 0,
            match_parameters: request.match_parameters,
            status: DuelStatus::Pending,
            winner_id: None,
            loser_id: None,
            transcript: Vec::new(),
            identities: None,
            server_link: None,
            dispute: None,
            review_note: None,
            settled_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(duel.clone()).await?;
        Metrics::incr(&self.metrics.duels_created_total);
        info!(duel_id = %duel.id, game = %duel.game, wager = duel.wager, "Challenge created");

        self.emit(
            &duel.id,
            vec![TaskPayload::SendDuelChallengeDm(SendDuelChallengeDm {
                recipient_ref: duel.opponent_id.clone(),
                challenger: duel.challenger_id.clone(),
                wager: duel.wager,
                map: handler.summary(&duel.match_parameters),
                duel_id: duel.id.clone(),
            })],
        )
        .await;
        Ok(duel)
    }

    /// Opponent accepts; both stakes move into escrow in one ledger batch.
    pub async fn accept(&self, id: &str, participant: &str) -> Result<TransitionOutcome, DuelError> {
        let _guard = self.lock_duel(id).await;
        let mut duel = self.load(id).await?;

        Self::require_participant(&duel, participant)?;
        if duel.opponent_id != participant {
            return Err(DuelError::Validation(
                "Only the challenged player can accept".to_string(),
            ));
        }
        match duel.status {
            DuelStatus::Pending => {}
            DuelStatus::Voided => return Err(Self::invalid(&duel, "accept")),
            _ => return Ok(TransitionOutcome::AlreadyTaken(duel)),
        }

        let escrow = escrow_entries(&duel);
        duel.status = DuelStatus::Accepted;
        self.commit(&mut duel, &escrow).await?;
        info!(duel_id = %duel.id, pot = duel.pot, "Duel accepted, stakes escrowed");

        self.emit(
            &duel.id,
            vec![TaskPayload::SendDuelAcceptedDm(SendDuelAcceptedDm {
                recipient_ref: duel.challenger_id.clone(),
                opponent: duel.opponent_id.clone(),
                duel_id: duel.id.clone(),
            })],
        )
        .await;
        Ok(TransitionOutcome::Applied(duel))
    }

    /// Opponent declines or challenger withdraws a pending challenge.
    pub async fn decline(&self, id: &str, participant: &str) -> Result<TransitionOutcome, DuelError> {
        let _guard = self.lock_duel(id).await;
        let mut duel = self.load(id).await?;

        Self::require_participant(&duel, participant)?;
        match duel.status {
            DuelStatus::Pending => {}
            DuelStatus::Voided => return Ok(TransitionOutcome::AlreadyTaken(duel)),
            _ => return Err(Self::invalid(&duel, "decline")),
        }

        duel.status = DuelStatus::Voided;
        duel.review_note = Some(if participant == duel.challenger_id {
            "Withdrawn by challenger".to_string()
        } else {
            "Declined by opponent".to_string()
        });
        self.commit(&mut duel, &[]).await?;
        Metrics::incr(&self.metrics.duels_voided_total);
        info!(duel_id = %duel.id, %participant, "Challenge declined");
        Ok(TransitionOutcome::Applied(duel))
    }

    /// Either side starts the match: capture identities, allocate a server,
    /// build the referee job.
    pub async fn start(&self, id: &str, participant: &str) -> Result<TransitionOutcome, DuelError> {
        let _guard = self.lock_duel(id).await;
        let mut duel = self.load(id).await?;

        Self::require_participant(&duel, participant)?;
        match duel.status {
            DuelStatus::Accepted => {}
            DuelStatus::Pending | DuelStatus::Voided => return Err(Self::invalid(&duel, "start")),
            _ => return Ok(TransitionOutcome::AlreadyTaken(duel)),
        }

        let handler = self.games.get(duel.game)?;
        let identities = MatchIdentities {
            challenger: self
                .identities
                .username(&duel.challenger_id, duel.game)
                .ok_or_else(|| {
                    DuelError::MissingIdentity(format!(
                        "{} has no linked {} account",
                        duel.challenger_id, duel.game
                    ))
                })?,
            opponent: self
                .identities
                .username(&duel.opponent_id, duel.game)
                .ok_or_else(|| {
                    DuelError::MissingIdentity(format!(
                        "{} has no linked {} account",
                        duel.opponent_id, duel.game
                    ))
                })?,
        };

        let region = handler.region(&duel.match_parameters)?;
        let server = self.servers.allocate(duel.game, &region, &duel.id).await?;
        let job = handler.create_match_task(
            &duel,
            &server,
            &identities.challenger,
            &identities.opponent,
        )?;

        duel.identities = Some(identities);
        duel.server_link = Some(server.link.clone());
        duel.status = DuelStatus::Started;
        self.commit(&mut duel, &[]).await?;
        info!(duel_id = %duel.id, starter = %participant, server = %server.link, "Match started");

        let counterpart = duel.counterpart(participant).unwrap_or_default().to_string();
        self.emit(
            &duel.id,
            vec![
                TaskPayload::SendDuelStartedDm(SendDuelStartedDm {
                    recipient_ref: counterpart,
                    starter: participant.to_string(),
                    server_link: server.link,
                }),
                TaskPayload::DispatchReferee(job),
            ],
        )
        .await;
        Ok(TransitionOutcome::Applied(duel))
    }

    /// The referee has the job; now we wait for its report.
    pub async fn mark_awaiting_result(&self, id: &str) -> Result<TransitionOutcome, DuelError> {
        let _guard = self.lock_duel(id).await;
        let mut duel = self.load(id).await?;

        match duel.status {
            DuelStatus::Started => {}
            DuelStatus::Pending | DuelStatus::Accepted => {
                return Err(Self::invalid(&duel, "await a result for"))
            }
            _ => return Ok(TransitionOutcome::AlreadyTaken(duel)),
        }

        duel.status = DuelStatus::AwaitingResult;
        self.commit(&mut duel, &[]).await?;
        Ok(TransitionOutcome::Applied(duel))
    }

    fn flag_for_review(&self, duel: &mut Duel, note: String) {
        warn!(duel_id = %duel.id, note = %note, "Duel flagged for manual review");
        Metrics::incr(&self.metrics.duels_flagged_total);
        duel.review_note = Some(note);
        duel.status = DuelStatus::AwaitingResult;
    }

    /// Apply a referee report.
    ///
    /// An unrecognised or missing winner never decides the duel: it is
    /// flagged for review and stays awaiting a result.
    pub async fn ingest_result(&self, id: &str, payload: &Value) -> Result<ResultOutcome, DuelError> {
        let _guard = self.lock_duel(id).await;
        let mut duel = self.load(id).await?;

        match duel.status {
            DuelStatus::Started | DuelStatus::AwaitingResult => {}
            DuelStatus::Pending | DuelStatus::Accepted => {
                return Err(Self::invalid(&duel, "record a result for"))
            }
            _ => return Ok(ResultOutcome::AlreadyResolved(duel)),
        }

        let handler = self.games.get(duel.game)?;
        let resolution = match handler.process_match_result(&duel, payload) {
            Ok(resolution) => resolution,
            Err(GameError::MissingIdentity(reason)) => {
                self.flag_for_review(&mut duel, reason);
                self.commit(&mut duel, &[]).await?;
                return Ok(ResultOutcome::Unresolved(duel));
            }
            Err(e) => return Err(e.into()),
        };

        duel.append_transcript(resolution.transcript);

        let (winner, loser) = match (resolution.winner_id, resolution.loser_id) {
            (Some(winner), Some(loser))
                if winner != loser && duel.is_participant(&winner) && duel.is_participant(&loser) =>
            {
                (winner, loser)
            }
            _ => {
                let reported = payload.to_string();
                self.flag_for_review(
                    &mut duel,
                    format!("Referee result did not name a known participant: {}", reported),
                );
                self.commit(&mut duel, &[]).await?;
                return Ok(ResultOutcome::Unresolved(duel));
            }
        };

        duel.winner_id = Some(winner.clone());
        duel.loser_id = Some(loser.clone());
        duel.review_note = None;
        duel.status = DuelStatus::PendingConfirmation;
        self.commit(&mut duel, &[]).await?;
        info!(duel_id = %duel.id, %winner, "Result recorded, awaiting confirmation");

        self.emit(
            &duel.id,
            vec![TaskPayload::PostDuelResult(PostDuelResult {
                duel_id: duel.id.clone(),
                game_id: duel.game.to_string(),
                winner,
                loser,
                pot: duel.pot,
                scores: resolution.scores,
            })],
        )
        .await;
        Ok(ResultOutcome::Resolved(duel))
    }

    /// Ledger batch and optional external payout for paying `winner`.
    fn settlement_plan(&self, duel: &Duel, winner: &str) -> (Vec<LedgerEntry>, Option<TaskPayload>) {
        let mut entries = Vec::new();
        if duel.house_fee > 0 {
            entries.push(LedgerEntry::credit(HOUSE_ACCOUNT, duel.house_fee));
        }

        let payout = if self.payouts.auto_payout && self.flags.is_enabled(PAYOUTS_FLAG) {
            self.identities.payout_address(winner).map(|address| {
                TaskPayload::SettlePayout(SettlePayout {
                    duel_id: duel.id.clone(),
                    recipient_address: address,
                    amount: self.payouts.amount(duel.pot),
                    token: self.payouts.token.clone(),
                })
            })
        } else {
            None
        };

        if payout.is_none() {
            entries.push(LedgerEntry::credit(winner, duel.pot));
        }
        (entries, payout)
    }

    /// Pay the pot out of escrow and close the duel. Caller holds the lock.
    async fn settle(&self, duel: &mut Duel, winner: &str, loser: &str) -> Result<(), DuelError> {
        let (entries, payout) = self.settlement_plan(duel, winner);

        duel.winner_id = Some(winner.to_string());
        duel.loser_id = Some(loser.to_string());
        duel.status = DuelStatus::Confirmed;
        duel.settled_at = Some(Utc::now());
        self.commit(duel, &entries).await?;
        Metrics::incr(&self.metrics.duels_confirmed_total);
        info!(duel_id = %duel.id, %winner, pot = duel.pot, external = payout.is_some(), "Duel settled");

        // Once escrow is released an unqueued payout would strand the pot.
        if let Some(payout) = payout {
            if let Err(e) = self.tasks.enqueue(payout).await {
                error!(duel_id = %duel.id, %winner, error = %e, "Failed to queue payout, crediting the pot internally");
                if let Err(credit) = self.ledger.apply(&[LedgerEntry::credit(winner, duel.pot)]) {
                    error!(duel_id = %duel.id, %winner, pot = duel.pot, error = %credit, "Internal credit failed, pot needs operator review");
                }
            }
        }
        Ok(())
    }

    /// Winner or loser confirms the reported result.
    pub async fn confirm(&self, id: &str, participant: &str) -> Result<TransitionOutcome, DuelError> {
        let _guard = self.lock_duel(id).await;
        let mut duel = self.load(id).await?;

        Self::require_participant(&duel, participant)?;
        match duel.status {
            DuelStatus::PendingConfirmation if duel.settled_at.is_none() => {}
            DuelStatus::Confirmed | DuelStatus::Disputed => {
                return Ok(TransitionOutcome::AlreadyTaken(duel))
            }
            _ => return Err(Self::invalid(&duel, "confirm")),
        }

        let (Some(winner), Some(loser)) = (duel.winner_id.clone(), duel.loser_id.clone()) else {
            return Err(Self::invalid(&duel, "confirm"));
        };
        self.settle(&mut duel, &winner, &loser).await?;
        Ok(TransitionOutcome::Applied(duel))
    }

    /// File a dispute; the pot stays frozen until an admin resolves it.
    pub async fn dispute(
        &self,
        id: &str,
        participant: &str,
        reason: &str,
        video_evidence: bool,
    ) -> Result<TransitionOutcome, DuelError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DuelError::Validation("A dispute needs a reason".to_string()));
        }

        let _guard = self.lock_duel(id).await;
        let mut duel = self.load(id).await?;

        Self::require_participant(&duel, participant)?;
        match duel.status {
            DuelStatus::PendingConfirmation => {}
            DuelStatus::Confirmed | DuelStatus::Disputed => {
                return Ok(TransitionOutcome::AlreadyTaken(duel))
            }
            _ => return Err(Self::invalid(&duel, "dispute")),
        }

        duel.dispute = Some(Dispute {
            filed_by: participant.to_string(),
            reason: reason.to_string(),
            video_evidence,
            filed_at: Utc::now(),
        });
        duel.status = DuelStatus::Disputed;
        self.commit(&mut duel, &[]).await?;
        info!(duel_id = %duel.id, %participant, video_evidence, "Dispute filed, pot frozen");

        self.emit(
            &duel.id,
            vec![TaskPayload::CreateTicketChannel(CreateTicketChannel {
                ticket_id: format!("dispute-{}", duel.id),
                user_ref: participant.to_string(),
                ticket_type: "dispute".to_string(),
                subject: format!("Dispute on {} duel {}", duel.game, duel.id),
                description: if video_evidence {
                    format!("{} (video evidence available)", reason)
                } else {
                    reason.to_string()
                },
            })],
        )
        .await;
        Ok(TransitionOutcome::Applied(duel))
    }

    async fn void_where<F>(&self, id: &str, note: &str, eligible: F) -> Result<TransitionOutcome, DuelError>
    where
        F: FnOnce(&Duel) -> bool,
    {
        let _guard = self.lock_duel(id).await;
        let mut duel = self.load(id).await?;

        match duel.status {
            DuelStatus::Voided => return Ok(TransitionOutcome::AlreadyTaken(duel)),
            DuelStatus::Confirmed => return Err(Self::invalid(&duel, "void")),
            _ => {}
        }
        if !eligible(&duel) {
            return Ok(TransitionOutcome::AlreadyTaken(duel));
        }

        let refunds = if duel.status.holds_escrow() {
            duel.settled_at = Some(Utc::now());
            refund_entries(&duel)
        } else {
            Vec::new()
        };
        duel.status = DuelStatus::Voided;
        duel.review_note = Some(note.to_string());
        self.commit(&mut duel, &refunds).await?;
        Metrics::incr(&self.metrics.duels_voided_total);
        info!(duel_id = %duel.id, refunded = !refunds.is_empty(), note, "Duel voided");
        Ok(TransitionOutcome::Applied(duel))
    }

    /// Admin void; both stakes go back to their owners.
    pub async fn void(&self, id: &str, note: &str) -> Result<TransitionOutcome, DuelError> {
        self.void_where(id, note, |_| true).await
    }

    /// Admin decision on a disputed or unresolved duel.
    pub async fn resolve(&self, id: &str, winner: &str) -> Result<TransitionOutcome, DuelError> {
        let _guard = self.lock_duel(id).await;
        let mut duel = self.load(id).await?;

        let announce = match duel.status {
            DuelStatus::Started | DuelStatus::AwaitingResult => true,
            DuelStatus::PendingConfirmation | DuelStatus::Disputed => {
                duel.winner_id.as_deref() != Some(winner)
            }
            DuelStatus::Confirmed => return Ok(TransitionOutcome::AlreadyTaken(duel)),
            _ => return Err(Self::invalid(&duel, "resolve")),
        };

        let loser = duel
            .counterpart(winner)
            .ok_or_else(|| DuelError::NotParticipant {
                duel_id: duel.id.clone(),
                participant: winner.to_string(),
            })?
            .to_string();

        self.settle(&mut duel, winner, &loser).await?;
        if announce {
            self.emit(
                &duel.id,
                vec![TaskPayload::PostDuelResult(PostDuelResult {
                    duel_id: duel.id.clone(),
                    game_id: duel.game.to_string(),
                    winner: winner.to_string(),
                    loser,
                    pot: duel.pot,
                    scores: None,
                })],
            )
            .await;
        }
        Ok(TransitionOutcome::Applied(duel))
    }

    /// Void and refund duels stuck in play past the configured threshold.
    pub async fn void_stale(&self, now: DateTime<Utc>) -> Result<Vec<DuelId>, DuelError> {
        let Some(threshold) = self.config.stale_refund_after() else {
            return Ok(Vec::new());
        };
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| DuelError::Validation(format!("Invalid stale threshold: {}", e)))?;
        let is_stale = move |duel: &Duel| {
            matches!(
                duel.status,
                DuelStatus::Accepted | DuelStatus::Started | DuelStatus::AwaitingResult
            ) && now - duel.updated_at > threshold
        };

        let candidates = self
            .store
            .list_by_status(&[DuelStatus::Accepted, DuelStatus::Started, DuelStatus::AwaitingResult])
            .await?;

        let mut voided = Vec::new();
        for duel in candidates.iter().filter(|d| is_stale(d)) {
            match self.void_where(&duel.id, "Expired without a result", is_stale).await {
                Ok(TransitionOutcome::Applied(duel)) => voided.push(duel.id),
                Ok(TransitionOutcome::AlreadyTaken(_)) => {}
                Err(e) => error!(duel_id = %duel.id, error = %e, "Failed to void stale duel"),
            }
        }
        if !voided.is_empty() {
            warn!(count = voided.len(), "Voided stale duels");
        }
        Ok(voided)
    }

    /// Run the stale sweeper until shutdown. No-op when the policy is off.
    pub fn spawn_stale_sweeper(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        self.config.stale_refund_after()?;
        Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.void_stale(Utc::now()).await {
                            error!(error = %e, "Stale duel sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Check a quick-match entry before it joins the queue; returns its region.
    pub fn validate_queue_entry(
        &self,
        participant: &str,
        game: GameKind,
        wager: u64,
        parameters: &Value,
    ) -> Result<String, DuelError> {
        self.check_wager(wager)?;
        let handler = self.check_game(game)?;
        handler.validate_parameters(parameters)?;
        self.check_linked(participant, game)?;
        self.check_balance(participant, wager)?;
        Ok(handler.region(parameters)?)
    }

    /// Pair two queue entries into a duel that starts out accepted.
    ///
    /// The house fee comes out of the pot: pot = 2 * wager - fee.
    pub async fn create_quick_match(&self, first: &QueueEntry, second: &QueueEntry) -> Result<Duel, DuelError> {
        self.check_linked(&first.participant_id, first.game)?;
        self.check_linked(&second.participant_id, second.game)?;

        let escrowed = first
            .wager
            .checked_mul(2)
            .ok_or_else(|| DuelError::Validation("Wager is too large".to_string()))?;
        let house_fee = (escrowed as u128 * self.config.quick_match_fee_bps as u128 / 10_000) as u64;

        let now = Utc::now();
        let duel = Duel {
            id: Uuid::new_v4().to_string(),
            game: first.game,
            origin: DuelOrigin::QuickMatch,
            challenger_id: first.participant_id.clone(),
            opponent_id: second.participant_id.clone(),
            wager: first.wager,
            pot: escrowed - house_fee,
            house_fee,
            match_parameters: first.match_parameters.clone(),
            status: DuelStatus::Accepted,
            winner_id: None,
            loser_id: None,
            transcript: Vec::new(),
            identities: None,
            server_link: None,
            dispute: None,
            review_note: None,
            settled_at: None,
            created_at: now,
            updated_at: now,
        };

        let escrow = escrow_entries(&duel);
        self.ledger.apply(&escrow)?;
        if let Err(e) = self.store.insert(duel.clone()).await {
            if let Err(undo) = self.ledger.apply(&reversed(&escrow)) {
                error!(duel_id = %duel.id, error = %undo, "Failed to release quick-match escrow");
            }
            return Err(e.into());
        }
        Metrics::incr(&self.metrics.duels_created_total);
        info!(duel_id = %duel.id, game = %duel.game, pot = duel.pot, house_fee, "Quick match paired");

        self.emit(
            &duel.id,
            vec![
                TaskPayload::SendDuelAcceptedDm(SendDuelAcceptedDm {
                    recipient_ref: duel.challenger_id.clone(),
                    opponent: duel.opponent_id.clone(),
                    duel_id: duel.id.clone(),
                }),
                TaskPayload::SendDuelAcceptedDm(SendDuelAcceptedDm {
                    recipient_ref: duel.opponent_id.clone(),
                    opponent: duel.challenger_id.clone(),
                    duel_id: duel.id.clone(),
                }),
            ],
        )
        .await;
        Ok(duel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerEntry;
    use crate::duels::store::InMemoryDuelStore;
    use crate::flags::StaticFlagSource;
    use crate::servers::{ServerStatusBoard, StaticServerPool};
    use crate::tasks::{InMemoryTaskStore, Task, TaskId, TaskStore, TaskType};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store whose updates can be made to fail on demand
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryDuelStore,
        fail_updates: AtomicBool,
    }

    #[async_trait]
    impl DuelStore for FlakyStore {
        async fn insert(&self, duel: Duel) -> Result<(), StorageError> {
            self.inner.insert(duel).await
        }

        async fn get(&self, id: &str) -> Result<Option<Duel>, StorageError> {
            self.inner.get(id).await
        }

        async fn update(&self, duel: &Duel) -> Result<(), StorageError> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(StorageError::WriteFailed("disk full".to_string()));
            }
            self.inner.update(duel).await
        }

        async fn list_by_status(&self, statuses: &[DuelStatus]) -> Result<Vec<Duel>, StorageError> {
            self.inner.list_by_status(statuses).await
        }
    }

    /// Task queue that can be made to refuse payout instructions
    #[derive(Default)]
    struct FlakyTasks {
        inner: InMemoryTaskStore,
        refuse_payouts: AtomicBool,
    }

    impl FlakyTasks {
        fn all(&self) -> Vec<Task> {
            self.inner.all()
        }
    }

    #[async_trait]
    impl TaskStore for FlakyTasks {
        async fn enqueue(&self, payload: TaskPayload) -> Result<Task, StorageError> {
            if payload.task_type() == TaskType::SettlePayout && self.refuse_payouts.load(Ordering::SeqCst) {
                return Err(StorageError::WriteFailed("queue unavailable".to_string()));
            }
            self.inner.enqueue(payload).await
        }

        async fn fetch_pending(&self, limit: usize) -> Result<Vec<Task>, StorageError> {
            self.inner.fetch_pending(limit).await
        }

        async fn mark_completed(&self, id: TaskId) -> Result<(), StorageError> {
            self.inner.mark_completed(id).await
        }

        async fn get(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
            self.inner.get(id).await
        }
    }

    struct Harness {
        service: Arc<DuelService>,
        store: Arc<FlakyStore>,
        tasks: Arc<FlakyTasks>,
        ledger: Arc<Ledger>,
        identities: Arc<IdentityDirectory>,
        board: Arc<ServerStatusBoard>,
    }

    impl Harness {
        async fn new(config: DuelsConfig, payouts: PayoutPolicy) -> Self {
            let store = Arc::new(FlakyStore::default());
            let tasks = Arc::new(FlakyTasks::default());
            let ledger = Arc::new(Ledger::new());
            let identities = Arc::new(IdentityDirectory::new(tasks.clone()));
            let board = Arc::new(ServerStatusBoard::new(tasks.clone()));
            let pool = StaticServerPool::new(
                &[ServerEntry {
                    game: GameKind::Arena,
                    region: "eu".to_string(),
                    link: "https://play.example/arena/eu-1".to_string(),
                }],
                board.clone(),
            );
            let flags = Arc::new(FeatureFlags::new(Arc::new(StaticFlagSource::new())));

            for (participant, username) in [("alice", "AliceGG"), ("bob", "BobTheBuilder")] {
                identities
                    .link_account(participant, GameKind::Arena, username)
                    .await
                    .unwrap();
                ledger.deposit(participant, 500).unwrap();
            }

            let service = Arc::new(DuelService::new(DuelServiceParts {
                store: store.clone(),
                tasks: tasks.clone(),
                ledger: ledger.clone(),
                games: GameRegistry::standard(),
                identities: identities.clone(),
                servers: Arc::new(pool),
                flags,
                metrics: Arc::new(Metrics::new()),
                config,
                payouts,
            }));

            Self {
                service,
                store,
                tasks,
                ledger,
                identities,
                board,
            }
        }

        async fn standard() -> Self {
            Self::new(DuelsConfig::default(), PayoutPolicy::internal_only()).await
        }

        fn challenge(&self, wager: u64) -> NewChallenge {
            NewChallenge {
                challenger_id: "alice".to_string(),
                opponent_id: "bob".to_string(),
                game: GameKind::Arena,
                wager,
                match_parameters: json!({ "map": "docks", "region": "eu" }),
            }
        }

        /// Challenge, accept and start a duel
        async fn started(&self, wager: u64) -> Duel {
            let duel = self.service.create_challenge(self.challenge(wager)).await.unwrap();
            self.service.accept(&duel.id, "bob").await.unwrap();
            self.service.start(&duel.id, "alice").await.unwrap().into_duel()
        }

        fn queued(&self, task_type: TaskType) -> Vec<TaskPayload> {
            self.tasks
                .all()
                .into_iter()
                .filter(|t| t.task_type() == task_type)
                .map(|t| t.payload)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_moves_pot_to_winner() {
        let h = Harness::standard().await;
        let duel = h.service.create_challenge(h.challenge(100)).await.unwrap();
        assert_eq!(duel.status, DuelStatus::Pending);
        assert_eq!(h.ledger.balance("alice"), 500);

        let accepted = h.service.accept(&duel.id, "bob").await.unwrap();
        assert!(accepted.is_applied());
        assert_eq!(h.ledger.balance("alice"), 400);
        assert_eq!(h.ledger.balance("bob"), 400);

        let started = h.service.start(&duel.id, "alice").await.unwrap().into_duel();
        assert_eq!(started.status, DuelStatus::Started);
        assert_eq!(started.server_link.as_deref(), Some("https://play.example/arena/eu-1"));
        assert_eq!(h.queued(TaskType::DispatchReferee).len(), 1);

        let outcome = h
            .service
            .ingest_result(&duel.id, &json!({ "winner": "bobthebuilder" }))
            .await
            .unwrap();
        let resolved = match outcome {
            ResultOutcome::Resolved(duel) => duel,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(resolved.winner_id.as_deref(), Some("bob"));
        assert_eq!(h.ledger.balance("bob"), 400);

        let confirmed = h.service.confirm(&duel.id, "alice").await.unwrap().into_duel();
        assert_eq!(confirmed.status, DuelStatus::Confirmed);
        assert!(confirmed.settled_at.is_some());
        assert_eq!(h.ledger.balance("bob"), 600);
        assert_eq!(h.ledger.balance("alice"), 400);
        assert_eq!(h.queued(TaskType::PostDuelResult).len(), 1);
    }

    #[tokio::test]
    async fn test_precheck_rejections() {
        let h = Harness::standard().await;

        let mut own = h.challenge(100);
        own.opponent_id = "alice".to_string();
        assert!(matches!(
            h.service.create_challenge(own).await,
            Err(DuelError::Validation(_))
        ));

        assert!(matches!(
            h.service.create_challenge(h.challenge(501)).await,
            Err(DuelError::InsufficientBalance { required: 501, .. })
        ));

        let mut unlinked = h.challenge(100);
        unlinked.opponent_id = "carol".to_string();
        assert!(matches!(
            h.service.create_challenge(unlinked).await,
            Err(DuelError::Validation(_))
        ));

        let mut bad_map = h.challenge(100);
        bad_map.match_parameters = json!({ "map": "moon", "region": "eu" });
        assert!(matches!(
            h.service.create_challenge(bad_map).await,
            Err(DuelError::Game(GameError::InvalidParameters(_)))
        ));
        assert!(h.queued(TaskType::SendDuelChallengeDm).is_empty());
    }

    #[tokio::test]
    async fn test_only_opponent_accepts_and_accept_is_idempotent() {
        let h = Harness::standard().await;
        let duel = h.service.create_challenge(h.challenge(100)).await.unwrap();

        assert!(matches!(
            h.service.accept(&duel.id, "alice").await,
            Err(DuelError::Validation(_))
        ));
        assert!(matches!(
            h.service.accept(&duel.id, "mallory").await,
            Err(DuelError::NotParticipant { .. })
        ));

        assert!(h.service.accept(&duel.id, "bob").await.unwrap().is_applied());
        assert!(!h.service.accept(&duel.id, "bob").await.unwrap().is_applied());
        assert_eq!(h.ledger.balance("bob"), 400);
    }

    #[tokio::test]
    async fn test_accept_without_funds_leaves_duel_pending() {
        let h = Harness::standard().await;
        let duel = h.service.create_challenge(h.challenge(300)).await.unwrap();
        h.ledger
            .apply(&[LedgerEntry::debit("bob", 400)])
            .unwrap();

        assert!(matches!(
            h.service.accept(&duel.id, "bob").await,
            Err(DuelError::InsufficientBalance { .. })
        ));
        assert_eq!(h.service.get(&duel.id).await.unwrap().status, DuelStatus::Pending);
        assert_eq!(h.ledger.balance("alice"), 500);
    }

    #[tokio::test]
    async fn test_store_failure_reverses_escrow() {
        let h = Harness::standard().await;
        let duel = h.service.create_challenge(h.challenge(100)).await.unwrap();
        h.store.fail_updates.store(true, Ordering::SeqCst);

        assert!(matches!(
            h.service.accept(&duel.id, "bob").await,
            Err(DuelError::Storage(_))
        ));
        assert_eq!(h.ledger.balance("alice"), 500);
        assert_eq!(h.ledger.balance("bob"), 500);
        assert_eq!(h.service.get(&duel.id).await.unwrap().status, DuelStatus::Pending);
        assert!(h.queued(TaskType::SendDuelAcceptedDm).is_empty());
    }

    #[tokio::test]
    async fn test_decline_releases_nothing_and_blocks_accept() {
        let h = Harness::standard().await;
        let duel = h.service.create_challenge(h.challenge(100)).await.unwrap();

        let declined = h.service.decline(&duel.id, "bob").await.unwrap().into_duel();
        assert_eq!(declined.status, DuelStatus::Voided);
        assert!(matches!(
            h.service.accept(&duel.id, "bob").await,
            Err(DuelError::InvalidTransition { .. })
        ));
        assert_eq!(h.ledger.balance("alice"), 500);
    }

    #[tokio::test]
    async fn test_start_fails_cleanly_when_region_offline() {
        let h = Harness::standard().await;
        let duel = h.service.create_challenge(h.challenge(100)).await.unwrap();
        h.service.accept(&duel.id, "bob").await.unwrap();
        h.board.set_status("eu", crate::servers::STATUS_OFFLINE, true).await;

        assert!(matches!(
            h.service.start(&duel.id, "bob").await,
            Err(DuelError::ServerUnavailable(AllocationError::RegionOffline(_)))
        ));
        assert_eq!(h.service.get(&duel.id).await.unwrap().status, DuelStatus::Accepted);
        assert!(h.queued(TaskType::DispatchReferee).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_winner_is_flagged_not_resolved() {
        let h = Harness::standard().await;
        let duel = h.started(100).await;

        let outcome = h
            .service
            .ingest_result(&duel.id, &json!({ "winner": "AliceG" }))
            .await
            .unwrap();
        let flagged = match outcome {
            ResultOutcome::Unresolved(duel) => duel,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(flagged.status, DuelStatus::AwaitingResult);
        assert!(flagged.winner_id.is_none());
        assert!(flagged.review_note.is_some());
        assert!(h.queued(TaskType::PostDuelResult).is_empty());

        // a corrected report still resolves it
        let outcome = h
            .service
            .ingest_result(&duel.id, &json!({ "winner": "AliceGG" }))
            .await
            .unwrap();
        assert!(matches!(outcome, ResultOutcome::Resolved(_)));
        assert!(outcome.duel().review_note.is_none());

        let again = h
            .service
            .ingest_result(&duel.id, &json!({ "winner": "BobTheBuilder" }))
            .await
            .unwrap();
        assert!(matches!(again, ResultOutcome::AlreadyResolved(_)));
        assert_eq!(again.duel().winner_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_dispute_freezes_pot_until_resolved() {
        let h = Harness::standard().await;
        let duel = h.started(100).await;
        h.service
            .ingest_result(&duel.id, &json!({ "winner": "AliceGG" }))
            .await
            .unwrap();

        assert!(matches!(
            h.service.dispute(&duel.id, "bob", "  ", false).await,
            Err(DuelError::Validation(_))
        ));
        let disputed = h
            .service
            .dispute(&duel.id, "bob", "Alice was teaming", true)
            .await
            .unwrap()
            .into_duel();
        assert_eq!(disputed.status, DuelStatus::Disputed);
        assert_eq!(h.queued(TaskType::CreateTicketChannel).len(), 1);

        let late = h.service.confirm(&duel.id, "alice").await.unwrap();
        assert!(!late.is_applied());
        assert_eq!(h.ledger.balance("alice"), 400);

        let resolved = h.service.resolve(&duel.id, "bob").await.unwrap().into_duel();
        assert_eq!(resolved.status, DuelStatus::Confirmed);
        assert_eq!(resolved.winner_id.as_deref(), Some("bob"));
        assert_eq!(h.ledger.balance("bob"), 600);
        // first announcement from the result, second for the changed winner
        assert_eq!(h.queued(TaskType::PostDuelResult).len(), 2);
    }

    #[tokio::test]
    async fn test_void_refunds_escrow_once() {
        let h = Harness::standard().await;
        let duel = h.started(100).await;

        let voided = h.service.void(&duel.id, "Server crashed").await.unwrap();
        assert!(voided.is_applied());
        assert_eq!(h.ledger.balance("alice"), 500);
        assert_eq!(h.ledger.balance("bob"), 500);

        assert!(!h.service.void(&duel.id, "again").await.unwrap().is_applied());
        assert_eq!(h.ledger.balance("alice"), 500);
    }

    #[tokio::test]
    async fn test_concurrent_confirms_settle_once() {
        let h = Harness::standard().await;
        let duel = h.started(100).await;
        h.service
            .ingest_result(&duel.id, &json!({ "winner": "AliceGG" }))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            h.service.confirm(&duel.id, "alice"),
            h.service.confirm(&duel.id, "bob")
        );
        let applied = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| o.is_applied())
            .count();
        assert_eq!(applied, 1);
        assert_eq!(h.ledger.balance("alice"), 600);
    }

    #[tokio::test]
    async fn test_auto_payout_queues_transfer_instead_of_credit() {
        let policy = PayoutPolicy {
            auto_payout: true,
            token: "USDC".to_string(),
            units_per_token: 100,
        };
        let h = Harness::new(DuelsConfig::default(), policy).await;
        h.identities
            .set_payout_address("alice", "0x1111111111111111111111111111111111111111")
            .unwrap();

        let duel = h.started(100).await;
        h.service
            .ingest_result(&duel.id, &json!({ "winner": "AliceGG" }))
            .await
            .unwrap();
        h.service.confirm(&duel.id, "bob").await.unwrap();

        assert_eq!(h.ledger.balance("alice"), 400);
        let payouts = h.queued(TaskType::SettlePayout);
        assert_eq!(payouts.len(), 1);
        match &payouts[0] {
            TaskPayload::SettlePayout(payout) => {
                assert_eq!(payout.duel_id, duel.id);
                assert_eq!(payout.amount, Decimal::from(2));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_sweep_voids_only_old_duels() {
        let config = DuelsConfig {
            stale_refund_after_secs: Some(3600),
            ..DuelsConfig::default()
        };
        let h = Harness::new(config, PayoutPolicy::internal_only()).await;
        let duel = h.started(100).await;

        assert!(h.service.void_stale(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(h.service.void_stale(later).await.unwrap(), vec![duel.id.clone()]);
        assert_eq!(h.service.get(&duel.id).await.unwrap().status, DuelStatus::Voided);
        assert_eq!(h.ledger.balance("alice"), 500);
    }

    #[tokio::test]
    async fn test_unqueued_payout_credits_winner_internally() {
        let policy = PayoutPolicy {
            auto_payout: true,
            token: "USDC".to_string(),
            units_per_token: 100,
        };
        let h = Harness::new(DuelsConfig::default(), policy).await;
        h.identities
            .set_payout_address("alice", "0x1111111111111111111111111111111111111111")
            .unwrap();
        let duel = h.started(100).await;
        h.service
            .ingest_result(&duel.id, &json!({ "winner": "AliceGG" }))
            .await
            .unwrap();
        h.tasks.refuse_payouts.store(true, Ordering::SeqCst);

        let confirmed = h.service.confirm(&duel.id, "bob").await.unwrap().into_duel();
        assert_eq!(confirmed.status, DuelStatus::Confirmed);
        assert!(h.queued(TaskType::SettlePayout).is_empty());
        assert_eq!(h.ledger.balance("alice"), 600);
        assert_eq!(h.ledger.balance("bob"), 400);

        // a second confirm must not credit again
        assert!(!h.service.confirm(&duel.id, "alice").await.unwrap().is_applied());
        assert_eq!(h.ledger.balance("alice"), 600);
    }

    #[tokio::test]
    async fn test_repeat_dispute_opens_one_ticket() {
        let h = Harness::standard().await;
        let duel = h.started(100).await;
        h.service
            .ingest_result(&duel.id, &json!({ "winner": "AliceGG" }))
            .await
            .unwrap();

        assert!(h
            .service
            .dispute(&duel.id, "bob", "Alice was teaming", false)
            .await
            .unwrap()
            .is_applied());
        let again = h
            .service
            .dispute(&duel.id, "bob", "Still teaming", true)
            .await
            .unwrap();
        assert!(matches!(again, TransitionOutcome::AlreadyTaken(_)));

        let duel = h.service.get(&duel.id).await.unwrap();
        assert_eq!(duel.status, DuelStatus::Disputed);
        assert_eq!(duel.dispute.as_ref().map(|d| d.reason.as_str()), Some("Alice was teaming"));
        assert_eq!(h.queued(TaskType::CreateTicketChannel).len(), 1);
        assert_eq!(h.ledger.balance("alice"), 400);
        assert_eq!(h.ledger.balance("bob"), 400);
    }

    #[tokio::test]
    async fn test_disputer_cannot_confirm_afterwards() {
        let h = Harness::standard().await;
        let duel = h.started(100).await;
        h.service
            .ingest_result(&duel.id, &json!({ "winner": "AliceGG" }))
            .await
            .unwrap();
        h.service
            .dispute(&duel.id, "bob", "Lag switch", false)
            .await
            .unwrap();

        let late = h.service.confirm(&duel.id, "bob").await.unwrap();
        assert!(matches!(late, TransitionOutcome::AlreadyTaken(_)));

        assert_eq!(h.service.get(&duel.id).await.unwrap().status, DuelStatus::Disputed);
        assert_eq!(h.queued(TaskType::CreateTicketChannel).len(), 1);
        assert_eq!(h.queued(TaskType::PostDuelResult).len(), 1);
        assert_eq!(h.ledger.balance("alice"), 400);
        assert_eq!(h.ledger.balance("bob"), 400);
    }

    #[tokio::test]
    async fn test_locks_are_dropped_once_idle() {
        let h = Harness::standard().await;
        let confirmed = h.started(100).await;
        h.service
            .ingest_result(&confirmed.id, &json!({ "winner": "AliceGG" }))
            .await
            .unwrap();
        let (a, b) = tokio::join!(
            h.service.confirm(&confirmed.id, "alice"),
            h.service.confirm(&confirmed.id, "bob")
        );
        a.unwrap();
        b.unwrap();

        let voided = h.started(100).await;
        h.service.void(&voided.id, "Server crashed").await.unwrap();
        assert!(!h.service.void(&voided.id, "again").await.unwrap().is_applied());

        assert!(matches!(
            h.service.confirm("missing", "alice").await,
            Err(DuelError::NotFound(_))
        ));
        assert_eq!(h.service.tracked_locks(), 0);
    }
}
