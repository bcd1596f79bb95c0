//! Duel lifecycle: types, persistence, state machine and quick-match queue

pub mod machine;
pub mod matchmaking;
pub mod store;
pub mod types;

pub use machine::{
    DuelError, DuelService, DuelServiceParts, NewChallenge, PayoutPolicy, PrecheckRequest,
    ResultOutcome, TransitionOutcome,
};
pub use matchmaking::{Matchmaker, QueueEntry, QueueOutcome};
pub use store::{DuelStore, InMemoryDuelStore};
pub use types::*;
