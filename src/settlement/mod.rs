//! Payout settlement over an external value-transfer network

pub mod network;
pub mod payouts;
pub mod service;
pub mod store;
pub mod tokens;

pub use network::{NetworkFailure, SimulatedNetwork, TransferClient, TransferNetwork, TransferRequest};
pub use payouts::{PayoutOutcome, PayoutRequest, PayoutService, PayoutStatus, SettlePayoutHandler};
pub use service::{RetryPolicy, SettlementError, SettlementService, TransferReceipt};
pub use store::{InMemoryPayoutStore, PayoutStore};
pub use tokens::{is_valid_address, TokenRegistry, TokenSpec};
