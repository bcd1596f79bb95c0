//! Payout ledger
//!
//! One [`PayoutRequest`] per duel id, kept in a [`PayoutStore`]. The request is
//! written to the store before the network is touched, so a second attempt for
//! the same duel can never broadcast again: not a concurrent one, and not a
//! redelivery after a restart. A request only leaves `reserved` once: to
//! `broadcast` with its transaction reference, or to `failed` for an operator
//! to look at. A `reserved` record found on entry belongs to an attempt that
//! died mid-flight; whether that attempt reached the network is unknown, so it
//! is parked as `failed` rather than sent again.

use super::service::{SettlementError, SettlementService};
use super::store::PayoutStore;
use crate::duels::DuelId;
use crate::metrics::Metrics;
use crate::tasks::{SettlePayout, Task, TaskError, TaskHandler, TaskPayload, TaskType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Reserved,
    Broadcast,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayoutRequest {
    pub duel_id: DuelId,
    pub recipient_address: String,
    pub amount: Decimal,
    pub token: String,
    pub status: PayoutStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_tx_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutRequest {
    pub(crate) fn reserve(instruction: &SettlePayout) -> Self {
        let now = Utc::now();
        Self {
            duel_id: instruction.duel_id.clone(),
            recipient_address: instruction.recipient_address.clone(),
            amount: instruction.amount,
            token: instruction.token.clone(),
            status: PayoutStatus::Reserved,
            external_tx_reference: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns false if the request already left `reserved`
    fn mark_broadcast(&mut self, tx_reference: String) -> bool {
        if self.status != PayoutStatus::Reserved || self.external_tx_reference.is_some() {
            return false;
        }
        self.status = PayoutStatus::Broadcast;
        self.external_tx_reference = Some(tx_reference);
        self.updated_at = Utc::now();
        true
    }

    fn mark_failed(&mut self, reason: String) {
        if self.status == PayoutStatus::Reserved {
            self.status = PayoutStatus::Failed;
            self.failure = Some(reason);
            self.updated_at = Utc::now();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayoutOutcome {
    Broadcast(PayoutRequest),
    /// An earlier attempt already broadcast this payout
    AlreadyBroadcast(PayoutRequest),
    /// Another attempt holds the reservation right now
    InFlight,
    /// Terminal failure, needs an operator
    Failed(PayoutRequest),
}

const INTERRUPTED: &str = "attempt interrupted before the broadcast was recorded";

/// Marks a duel's payout as being worked on by this process
struct Claim<'a> {
    in_flight: &'a DashSet<DuelId>,
    duel_id: DuelId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.duel_id);
    }
}

pub struct PayoutService {
    settlement: Arc<SettlementService>,
    store: Arc<dyn PayoutStore>,
    in_flight: DashSet<DuelId>,
    metrics: Arc<Metrics>,
}

impl PayoutService {
    pub fn new(settlement: Arc<SettlementService>, store: Arc<dyn PayoutStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            settlement,
            store,
            in_flight: DashSet::new(),
            metrics,
        }
    }

    pub async fn get(&self, duel_id: &str) -> Result<Option<PayoutRequest>, SettlementError> {
        Ok(self.store.find_payout(duel_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<PayoutRequest>, SettlementError> {
        Ok(self.store.list_payouts().await?)
    }

    fn claim(&self, duel_id: &str) -> Option<Claim<'_>> {
        if !self.in_flight.insert(duel_id.to_string()) {
            return None;
        }
        Some(Claim {
            in_flight: &self.in_flight,
            duel_id: duel_id.to_string(),
        })
    }

    /// Settle a payout at most once per duel id.
    ///
    /// Connection failures release the reservation and return `Err`, since
    /// nothing was sent and the caller may try again later.
    pub async fn settle(&self, instruction: &SettlePayout) -> Result<PayoutOutcome, SettlementError> {
        let Some(_claim) = self.claim(&instruction.duel_id) else {
            return Ok(PayoutOutcome::InFlight);
        };

        let mut request = PayoutRequest::reserve(instruction);
        if let Some(existing) = self.store.reserve_payout(&request).await? {
            return self.resume(existing).await;
        }

        let result = self
            .settlement
            .transfer(
                &instruction.recipient_address,
                instruction.amount,
                &instruction.token,
                &instruction.duel_id,
            )
            .await;

        match result {
            Ok(receipt) => {
                if !request.mark_broadcast(receipt.tx_reference.clone()) {
                    warn!(duel_id = %instruction.duel_id, "Payout left reserved state during broadcast");
                }
                // The record stays `reserved` on disk if this write fails; a
                // redelivery then parks it instead of sending again.
                if let Err(e) = self.store.update_payout(&request).await {
                    error!(
                        duel_id = %instruction.duel_id,
                        tx = %receipt.tx_reference,
                        error = %e,
                        "Payout broadcast but its record could not be updated"
                    );
                }
                Metrics::incr(&self.metrics.payouts_broadcast_total);
                info!(duel_id = %instruction.duel_id, tx = %receipt.tx_reference, "Payout broadcast");
                Ok(PayoutOutcome::Broadcast(request))
            }
            Err(e @ SettlementError::InitializationFailed { .. }) => {
                if let Err(release) = self.store.release_payout(&instruction.duel_id).await {
                    warn!(duel_id = %instruction.duel_id, error = %release, "Could not release payout reservation");
                }
                Err(e)
            }
            Err(e) => {
                request.mark_failed(e.to_string());
                self.park(&request).await;
                error!(
                    duel_id = %instruction.duel_id,
                    token = %instruction.token,
                    recipient = %instruction.recipient_address,
                    error = %e,
                    "Payout failed, needs operator review"
                );
                Ok(PayoutOutcome::Failed(request))
            }
        }
    }

    async fn resume(&self, mut existing: PayoutRequest) -> Result<PayoutOutcome, SettlementError> {
        match existing.status {
            PayoutStatus::Broadcast => Ok(PayoutOutcome::AlreadyBroadcast(existing)),
            PayoutStatus::Failed => Ok(PayoutOutcome::Failed(existing)),
            PayoutStatus::Reserved => {
                existing.mark_failed(INTERRUPTED.to_string());
                self.park(&existing).await;
                error!(
                    duel_id = %existing.duel_id,
                    recipient = %existing.recipient_address,
                    "Found an interrupted payout, parked for operator review"
                );
                Ok(PayoutOutcome::Failed(existing))
            }
        }
    }

    async fn park(&self, request: &PayoutRequest) {
        Metrics::incr(&self.metrics.payouts_failed_total);
        if let Err(e) = self.store.update_payout(request).await {
            error!(duel_id = %request.duel_id, error = %e, "Could not record failed payout");
        }
    }
}

/// Handler for `SETTLE_PAYOUT`
pub struct SettlePayoutHandler {
    payouts: Arc<PayoutService>,
}

impl SettlePayoutHandler {
    pub fn new(payouts: Arc<PayoutService>) -> Self {
        Self { payouts }
    }
}

#[async_trait]
impl TaskHandler for SettlePayoutHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let TaskPayload::SettlePayout(instruction) = &task.payload else {
            return Err(TaskError::PayloadMismatch {
                task_id: task.id,
                expected: TaskType::SettlePayout,
                found: task.task_type(),
            });
        };

        match self.payouts.settle(instruction).await {
            Ok(PayoutOutcome::Broadcast(_)) | Ok(PayoutOutcome::AlreadyBroadcast(_)) => Ok(()),
            // Failed payouts are parked for review, not retried.
            Ok(PayoutOutcome::Failed(_)) => Ok(()),
            Ok(PayoutOutcome::InFlight) => Err(TaskError::Settlement(format!(
                "payout for duel {} is already in flight",
                instruction.duel_id
            ))),
            Err(e) => Err(TaskError::Settlement(e.to_string())),
        }
    }
}
