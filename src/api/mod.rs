//! Duelgate HTTP API
//!
//! Participant actions, referee result ingestion and operator endpoints.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use routes::create_router;
pub use server::{shutdown_signal, ApiServer};
