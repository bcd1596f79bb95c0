//! Value-transfer network boundary

use super::tokens::TokenSpec;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkFailure {
    /// The connection is gone; the cached client must be rebuilt
    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// A fully validated transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub token: TokenSpec,
    pub recipient: String,
    pub base_units: u128,
    /// Caller's idempotency key, e.g. the duel id
    pub reference: String,
}

/// Opens connections to the network
#[async_trait]
pub trait TransferNetwork: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn TransferClient>, NetworkFailure>;
}

/// An open connection
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Dry run; returns the estimated network fee in the token's base units
    async fn estimate(&self, request: &TransferRequest) -> Result<u128, NetworkFailure>;

    /// Submit the transfer and return its transaction hash
    async fn broadcast(&self, request: &TransferRequest) -> Result<String, NetworkFailure>;
}

#[derive(Debug, Default)]
struct SimulatedState {
    connect_failures: AtomicU32,
    estimate_failures: Mutex<Vec<NetworkFailure>>,
    broadcast_failures: Mutex<Vec<NetworkFailure>>,
    connects: AtomicU32,
    nonce: AtomicU64,
    broadcasts: Mutex<Vec<(TransferRequest, String)>>,
}

/// In-process stand-in for the transfer network
///
/// Transaction hashes are derived from the signer, the request and a nonce, so
/// two broadcasts never share a hash. Failures can be queued per stage.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    signer: String,
    state: Arc<SimulatedState>,
}

impl SimulatedNetwork {
    pub fn new(signer: impl Into<String>) -> Self {
        Self {
            signer: signer.into(),
            state: Arc::new(SimulatedState::default()),
        }
    }

    pub fn fail_connects(&self, times: u32) {
        self.state.connect_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_next_estimate(&self, failure: NetworkFailure) {
        lock(&self.state.estimate_failures).push(failure);
    }

    pub fn fail_next_broadcast(&self, failure: NetworkFailure) {
        lock(&self.state.broadcast_failures).push(failure);
    }

    pub fn connect_count(&self) -> u32 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn broadcasts(&self) -> Vec<(TransferRequest, String)> {
        lock(&self.state.broadcasts).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl TransferNetwork for SimulatedNetwork {
    async fn connect(&self) -> Result<Arc<dyn TransferClient>, NetworkFailure> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .state
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NetworkFailure::Disconnected("connection refused".to_string()));
        }
        Ok(Arc::new(SimulatedClient {
            signer: self.signer.clone(),
            state: self.state.clone(),
        }))
    }
}

struct SimulatedClient {
    signer: String,
    state: Arc<SimulatedState>,
}

#[async_trait]
impl TransferClient for SimulatedClient {
    async fn estimate(&self, request: &TransferRequest) -> Result<u128, NetworkFailure> {
        if let Some(failure) = lock(&self.state.estimate_failures).pop() {
            return Err(failure);
        }
        if request.base_units == 0 {
            return Err(NetworkFailure::Rejected("zero-value transfer".to_string()));
        }
        Ok(21_000)
    }

    async fn broadcast(&self, request: &TransferRequest) -> Result<String, NetworkFailure> {
        if let Some(failure) = lock(&self.state.broadcast_failures).pop() {
            return Err(failure);
        }

        let nonce = self.state.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(self.signer.as_bytes());
        hasher.update(request.token.contract.as_bytes());
        hasher.update(request.recipient.as_bytes());
        hasher.update(request.base_units.to_be_bytes());
        hasher.update(request.reference.as_bytes());
        hasher.update(nonce.to_be_bytes());
        let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));

        debug!(reference = %request.reference, tx_hash = %tx_hash, "Transfer broadcast");
        lock(&self.state.broadcasts).push((request.clone(), tx_hash.clone()));
        Ok(tx_hash)
    }
}
