//! Duelgate - wager duel orchestration
//!
//! Runs head-to-head wager matches from challenge to payout: per-game rule
//! handlers, a duel state machine with escrow, a durable task queue for
//! deferred side effects, notification handlers and external payout
//! settlement.

pub mod api;
pub mod app;
pub mod config;
pub mod duels;
pub mod errors;
pub mod flags;
pub mod games;
pub mod identity;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod servers;
pub mod settlement;
pub mod tasks;

pub use app::{App, Stores};
pub use config::{ConfigLoader, DuelgateConfig};
pub use errors::{DuelgateError, DuelgateResult};
