//! Durable at-least-once work items and their dispatcher

pub mod dispatcher;
pub mod rocks_store;
pub mod store;
pub mod types;

pub use dispatcher::{CycleOutcome, CycleReport, HandlerRegistry, TaskDispatcher, TaskError, TaskHandler};
pub use rocks_store::RocksTaskStore;
pub use store::{InMemoryTaskStore, TaskStore};
pub use types::*;
