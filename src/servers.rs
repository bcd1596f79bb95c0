//! Private match servers
//!
//! The allocator hands out a server link per (game, region). The status board
//! tracks which regions are up and queues an `ANNOUNCE_SERVER_STATUS` task
//! whenever a region changes state.

use crate::config::ServerEntry;
use crate::games::{AllocatedServer, GameKind};
use crate::tasks::{AnnounceServerStatus, TaskPayload, TaskStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info};

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("No {game} servers configured in {region}")]
    NoCapacity { game: GameKind, region: String },

    #[error("Servers in {0} are offline")]
    RegionOffline(String),
}

#[async_trait]
pub trait ServerAllocator: Send + Sync {
    async fn allocate(
        &self,
        game: GameKind,
        region: &str,
        duel_id: &str,
    ) -> Result<AllocatedServer, AllocationError>;
}

/// Region up/down state
pub struct ServerStatusBoard {
    statuses: DashMap<String, String>,
    tasks: Arc<dyn TaskStore>,
}

impl ServerStatusBoard {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self {
            statuses: DashMap::new(),
            tasks,
        }
    }

    /// Regions are online until told otherwise
    pub fn status(&self, region: &str) -> String {
        self.statuses
            .get(&region.to_lowercase())
            .map(|s| s.value().clone())
            .unwrap_or_else(|| STATUS_ONLINE.to_string())
    }

    pub fn is_online(&self, region: &str) -> bool {
        self.status(region) == STATUS_ONLINE
    }

    /// Record a status. Returns true if it changed, in which case an
    /// announcement task is queued.
    pub async fn set_status(&self, region: &str, status: &str, silent: bool) -> bool {
        let region = region.trim().to_lowercase();
        let status = status.trim().to_lowercase();

        let previous = self.statuses.insert(region.clone(), status.clone());
        let changed = match previous {
            Some(previous) => previous != status,
            None => status != STATUS_ONLINE,
        };
        if !changed {
            return false;
        }

        info!(%region, %status, "Server status changed");
        let announce = TaskPayload::AnnounceServerStatus(AnnounceServerStatus {
            region: region.clone(),
            status,
            silent,
        });
        if let Err(e) = self.tasks.enqueue(announce).await {
            error!(%region, error = %e, "Failed to queue server status announcement");
        }
        true
    }
}

/// Fixed pool from configuration, handed out round-robin
pub struct StaticServerPool {
    pool: HashMap<(GameKind, String), Vec<String>>,
    cursor: AtomicUsize,
    board: Arc<ServerStatusBoard>,
}

impl StaticServerPool {
    pub fn new(entries: &[ServerEntry], board: Arc<ServerStatusBoard>) -> Self {
        let mut pool: HashMap<(GameKind, String), Vec<String>> = HashMap::new();
        for entry in entries {
            pool.entry((entry.game, entry.region.to_lowercase()))
                .or_default()
                .push(entry.link.clone());
        }
        Self {
            pool,
            cursor: AtomicUsize::new(0),
            board,
        }
    }
}

#[async_trait]
impl ServerAllocator for StaticServerPool {
    async fn allocate(
        &self,
        game: GameKind,
        region: &str,
        duel_id: &str,
    ) -> Result<AllocatedServer, AllocationError> {
        let region = region.to_lowercase();
        if !self.board.is_online(&region) {
            return Err(AllocationError::RegionOffline(region));
        }

        let links = self
            .pool
            .get(&(game, region.clone()))
            .filter(|links| !links.is_empty())
            .ok_or_else(|| AllocationError::NoCapacity {
                game,
                region: region.clone(),
            })?;

        let link = &links[self.cursor.fetch_add(1, Ordering::Relaxed) % links.len()];
        info!(duel_id, %game, %region, "Server allocated");
        Ok(AllocatedServer {
            region,
            link: link.clone(),
        })
    }
}
