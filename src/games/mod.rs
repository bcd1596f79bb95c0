pub mod arena;
pub mod handler;
pub mod registry;
pub mod sumo;
pub mod types;

pub use handler::GameHandler;
pub use registry::GameRegistry;
pub use types::*;
