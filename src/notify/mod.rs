//! Task handlers that act on the outside world

/// Borrow the typed payload of `$task`, or fail with `PayloadMismatch`
macro_rules! payload {
    ($task:expr, $variant:ident) => {
        match &$task.payload {
            crate::tasks::TaskPayload::$variant(payload) => payload,
            _ => {
                return Err(crate::tasks::TaskError::PayloadMismatch {
                    task_id: $task.id,
                    expected: crate::tasks::TaskType::$variant,
                    found: $task.task_type(),
                })
            }
        }
    };
}

pub mod gateway;
pub mod handlers;
pub mod referee;

pub use gateway::{ChannelRef, Gateway, GatewayError, InMemoryGateway};
pub use handlers::{register_notification_handlers, NotifyContext};
pub use referee::{DispatchRefereeHandler, RefereeClient, RefereeQueue};
