//! Referee dispatch
//!
//! `DISPATCH_REFEREE` tasks hand the match job to the referee queue, which
//! referee bots poll over HTTP. Once handed over, the duel moves to
//! `awaiting_result`.

use crate::duels::{DuelService, DuelStatus};
use crate::games::{GameKind, RefereeJob};
use crate::tasks::{Task, TaskError, TaskHandler};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[async_trait]
pub trait RefereeClient: Send + Sync {
    /// Hand a job to the referee. Handing over the same duel twice is a no-op.
    async fn dispatch(&self, job: &RefereeJob) -> Result<(), TaskError>;
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<RefereeJob>,
    seen: HashSet<String>,
}

/// Jobs waiting for a referee bot to pick them up
#[derive(Debug, Default)]
pub struct RefereeQueue {
    state: Mutex<QueueState>,
}

impl RefereeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop up to `limit` jobs, optionally for one game only
    pub async fn take(&self, game: Option<GameKind>, limit: usize) -> Vec<RefereeJob> {
        let mut state = self.state.lock().await;
        let mut taken = Vec::new();
        let mut kept = VecDeque::new();
        while let Some(job) = state.jobs.pop_front() {
            if taken.len() < limit && game.map_or(true, |g| g == job.game) {
                taken.push(job);
            } else {
                kept.push_back(job);
            }
        }
        state.jobs = kept;
        taken
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RefereeClient for RefereeQueue {
    async fn dispatch(&self, job: &RefereeJob) -> Result<(), TaskError> {
        let mut state = self.state.lock().await;
        if !state.seen.insert(job.duel_id.clone()) {
            debug!(duel_id = %job.duel_id, "Referee job already queued");
            return Ok(());
        }
        state.jobs.push_back(job.clone());
        info!(duel_id = %job.duel_id, game = %job.game, "Referee job queued");
        Ok(())
    }
}

/// Handler for `DISPATCH_REFEREE`
pub struct DispatchRefereeHandler {
    duels: Arc<DuelService>,
    referee: Arc<dyn RefereeClient>,
}

impl DispatchRefereeHandler {
    pub fn new(duels: Arc<DuelService>, referee: Arc<dyn RefereeClient>) -> Self {
        Self { duels, referee }
    }
}

#[async_trait]
impl TaskHandler for DispatchRefereeHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let job = payload!(task, DispatchReferee);

        let duel = self
            .duels
            .get(&job.duel_id)
            .await
            .map_err(|e| TaskError::Duel(e.to_string()))?;
        if duel.status != DuelStatus::Started {
            debug!(duel_id = %duel.id, status = %duel.status, "Duel moved on, skipping referee dispatch");
            return Ok(());
        }

        self.referee.dispatch(job).await?;
        self.duels
            .mark_awaiting_result(&job.duel_id)
            .await
            .map_err(|e| TaskError::Duel(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(duel_id: &str, game: GameKind) -> RefereeJob {
        RefereeJob {
            duel_id: duel_id.to_string(),
            game,
            server_link: "https://play/eu-1".to_string(),
            challenger_username: "AliceGG".to_string(),
            opponent_username: "BobTheBuilder".to_string(),
            wager: 100,
            rules: json!({}),
        }
    }

    #[tokio::test]
    async fn test_queue_dedupes_by_duel() {
        let queue = RefereeQueue::new();
        queue.dispatch(&job("d-1", GameKind::Arena)).await.unwrap();
        queue.dispatch(&job("d-1", GameKind::Arena)).await.unwrap();
        assert_eq!(queue.len().await, 1);

        assert_eq!(queue.take(None, 10).await.len(), 1);
        queue.dispatch(&job("d-1", GameKind::Arena)).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_take_filters_by_game() {
        let queue = RefereeQueue::new();
        queue.dispatch(&job("d-1", GameKind::Arena)).await.unwrap();
        queue.dispatch(&job("d-2", GameKind::Sumo)).await.unwrap();
        queue.dispatch(&job("d-3", GameKind::Sumo)).await.unwrap();

        let sumo = queue.take(Some(GameKind::Sumo), 1).await;
        assert_eq!(sumo.len(), 1);
        assert_eq!(sumo[0].duel_id, "d-2");
        assert_eq!(queue.len().await, 2);
    }
}
