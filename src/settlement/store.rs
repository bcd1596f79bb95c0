//! Payout record storage
//!
//! A payout record has to outlive the process: the `SETTLE_PAYOUT` task that
//! produced it can be redelivered after a restart, and the record is the only
//! thing standing between that redelivery and a second broadcast.

use super::payouts::PayoutRequest;
use super::service::SettlementError;
use crate::errors::StorageError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Insert `request` unless its duel already has a record.
    ///
    /// Returns the existing record when there is one, `None` when `request`
    /// was stored.
    async fn reserve_payout(&self, request: &PayoutRequest) -> Result<Option<PayoutRequest>, StorageError>;

    /// Overwrite the record for `request.duel_id`
    async fn update_payout(&self, request: &PayoutRequest) -> Result<(), StorageError>;

    /// Drop a reservation that never reached the network
    async fn release_payout(&self, duel_id: &str) -> Result<(), StorageError>;

    async fn find_payout(&self, duel_id: &str) -> Result<Option<PayoutRequest>, StorageError>;

    /// Every record, oldest first
    async fn list_payouts(&self) -> Result<Vec<PayoutRequest>, StorageError>;
}

impl From<StorageError> for SettlementError {
    fn from(e: StorageError) -> Self {
        SettlementError::Storage(e.to_string())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPayoutStore {
    records: DashMap<String, PayoutRequest>,
}

impl InMemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutStore for InMemoryPayoutStore {
    async fn reserve_payout(&self, request: &PayoutRequest) -> Result<Option<PayoutRequest>, StorageError> {
        match self.records.entry(request.duel_id.clone()) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(request.clone());
                Ok(None)
            }
        }
    }

    async fn update_payout(&self, request: &PayoutRequest) -> Result<(), StorageError> {
        self.records.insert(request.duel_id.clone(), request.clone());
        Ok(())
    }

    async fn release_payout(&self, duel_id: &str) -> Result<(), StorageError> {
        self.records.remove(duel_id);
        Ok(())
    }

    async fn find_payout(&self, duel_id: &str) -> Result<Option<PayoutRequest>, StorageError> {
        Ok(self.records.get(duel_id).map(|r| r.value().clone()))
    }

    async fn list_payouts(&self) -> Result<Vec<PayoutRequest>, StorageError> {
        let mut records: Vec<PayoutRequest> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
