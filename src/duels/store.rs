//! Duel persistence boundary

use super::types::{Duel, DuelStatus};
use crate::errors::StorageError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[async_trait]
pub trait DuelStore: Send + Sync {
    /// Store a new duel; fails if the id exists
    async fn insert(&self, duel: Duel) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Option<Duel>, StorageError>;

    /// Replace an existing duel
    async fn update(&self, duel: &Duel) -> Result<(), StorageError>;

    async fn list_by_status(&self, statuses: &[DuelStatus]) -> Result<Vec<Duel>, StorageError>;
}

#[derive(Debug, Default)]
pub struct InMemoryDuelStore {
    duels: DashMap<String, Duel>,
}

impl InMemoryDuelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DuelStore for InMemoryDuelStore {
    async fn insert(&self, duel: Duel) -> Result<(), StorageError> {
        match self.duels.entry(duel.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::WriteFailed(format!(
                "duel {} already exists",
                duel.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(duel);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Duel>, StorageError> {
        Ok(self.duels.get(id).map(|d| d.value().clone()))
    }

    async fn update(&self, duel: &Duel) -> Result<(), StorageError> {
        match self.duels.get_mut(&duel.id) {
            Some(mut existing) => {
                *existing = duel.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("duel {}", duel.id))),
        }
    }

    async fn list_by_status(&self, statuses: &[DuelStatus]) -> Result<Vec<Duel>, StorageError> {
        let mut duels: Vec<Duel> = self
            .duels
            .iter()
            .filter(|d| statuses.contains(&d.status))
            .map(|d| d.value().clone())
            .collect();
        duels.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(duels)
    }
}
