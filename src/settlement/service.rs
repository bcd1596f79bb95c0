//! Settlement service
//!
//! Owns the single shared connection to the transfer network. The connection
//! is created lazily on first use; concurrent callers queue on the same lock
//! and re-check instead of opening a second connection. A transfer is
//! validated locally, estimated, then broadcast. Estimate and broadcast
//! failures are returned to the caller and never retried here.

use super::network::{NetworkFailure, TransferClient, TransferNetwork, TransferRequest};
use super::tokens::{is_valid_address, TokenRegistry};
use crate::config::SettlementConfig;
use crate::metrics::Metrics;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("Unsupported token: {0}")]
    UnsupportedToken(String),

    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount {amount} {token}: {reason}")]
    InvalidAmount {
        amount: Decimal,
        token: String,
        reason: String,
    },

    #[error("Could not connect to the transfer network after {attempts} attempts: {reason}")]
    InitializationFailed { attempts: u32, reason: String },

    #[error("Estimate failed for {token} transfer to {recipient}: {reason}")]
    EstimateFailed {
        token: String,
        recipient: String,
        reason: String,
    },

    #[error("Broadcast failed for {token} transfer to {recipient}: {reason}")]
    BroadcastFailed {
        token: String,
        recipient: String,
        reason: String,
    },

    #[error("Settlement is disabled: {0}")]
    Disabled(String),

    #[error("Payout record storage failed: {0}")]
    Storage(String),
}

impl SettlementError {
    /// Failures raised before anything reached the network
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            SettlementError::UnsupportedToken(_)
                | SettlementError::InvalidAddress(_)
                | SettlementError::InvalidAmount { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_reference: String,
    pub token: String,
    pub recipient: String,
    pub amount: Decimal,
    pub estimated_fee: u128,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl From<&SettlementConfig> for RetryPolicy {
    fn from(config: &SettlementConfig) -> Self {
        Self {
            max_attempts: config.init_max_attempts,
            delay: config.init_retry_delay(),
        }
    }
}

pub struct SettlementService {
    network: Arc<dyn TransferNetwork>,
    tokens: TokenRegistry,
    retry: RetryPolicy,
    client: Mutex<Option<Arc<dyn TransferClient>>>,
    metrics: Arc<Metrics>,
}

impl SettlementService {
    pub fn new(
        network: Arc<dyn TransferNetwork>,
        tokens: TokenRegistry,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            network,
            tokens,
            retry,
            client: Mutex::new(None),
            metrics,
        }
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    /// Shared client, connecting first if needed.
    async fn client(&self) -> Result<Arc<dyn TransferClient>, SettlementError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = self.connect_with_retry().await?;
        *slot = Some(client.clone());
        Ok(client)
    }

    async fn connect_with_retry(&self) -> Result<Arc<dyn TransferClient>, SettlementError> {
        let mut last_failure = String::new();
        for attempt in 1..=self.retry.max_attempts {
            match self.network.connect().await {
                Ok(client) => {
                    info!(attempt, "Connected to transfer network");
                    return Ok(client);
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.retry.max_attempts, error = %e, "Transfer network connection failed");
                    last_failure = e.to_string();
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        Metrics::incr(&self.metrics.settlement_init_failures_total);
        error!(attempts = self.retry.max_attempts, "Giving up on transfer network connection");
        Err(SettlementError::InitializationFailed {
            attempts: self.retry.max_attempts,
            reason: last_failure,
        })
    }

    async fn drop_client(&self) {
        *self.client.lock().await = None;
    }

    async fn on_failure(&self, failure: &NetworkFailure) {
        if matches!(failure, NetworkFailure::Disconnected(_)) {
            warn!("Transfer network connection lost, next call reconnects");
            self.drop_client().await;
        }
    }

    /// Move `amount` of `token` to `recipient`.
    ///
    /// `reference` travels with the transfer for tracing; deduplication is the
    /// caller's job.
    pub async fn transfer(
        &self,
        recipient: &str,
        amount: Decimal,
        token: &str,
        reference: &str,
    ) -> Result<TransferReceipt, SettlementError> {
        let spec = self.tokens.get(token)?.clone();
        if !is_valid_address(recipient) {
            return Err(SettlementError::InvalidAddress(recipient.to_string()));
        }
        let base_units = spec.to_base_units(amount)?;

        let request = TransferRequest {
            token: spec.clone(),
            recipient: recipient.to_string(),
            base_units,
            reference: reference.to_string(),
        };

        let client = self.client().await?;

        let estimated_fee = match client.estimate(&request).await {
            Ok(fee) => fee,
            Err(e) => {
                self.on_failure(&e).await;
                return Err(SettlementError::EstimateFailed {
                    token: spec.symbol,
                    recipient: recipient.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let tx_reference = match client.broadcast(&request).await {
            Ok(tx) => tx,
            Err(e) => {
                self.on_failure(&e).await;
                return Err(SettlementError::BroadcastFailed {
                    token: spec.symbol,
                    recipient: recipient.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        info!(%reference, token = %spec.symbol, %recipient, %amount, %tx_reference, "Transfer broadcast");
        Ok(TransferReceipt {
            tx_reference,
            token: spec.symbol,
            recipient: recipient.to_string(),
            amount,
            estimated_fee,
        })
    }

    /// Connect in the background so the first payout does not pay for it
    pub fn spawn_warmup(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.client().await {
                Ok(_) => info!("Settlement connection warmed up"),
                Err(e) => error!(error = %e, "Settlement warm-up failed, will retry on first payout"),
            }
        })
    }
}
