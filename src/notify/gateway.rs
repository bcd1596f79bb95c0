//! Notification gateway boundary
//!
//! Every call is atomic and fire-and-forget from the caller's point of view,
//! and any call may fail on its own. Handlers built on top must tolerate
//! redelivery.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub type ChannelRef = String;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Gateway rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_message(&self, channel: &str, content: &str) -> Result<(), GatewayError>;

    async fn send_dm(&self, user: &str, content: &str) -> Result<(), GatewayError>;

    /// Current name of a channel, `None` if it does not exist
    async fn channel_name(&self, channel: &str) -> Result<Option<String>, GatewayError>;

    async fn rename_channel(&self, channel: &str, name: &str) -> Result<(), GatewayError>;

    async fn find_channel(&self, name: &str) -> Result<Option<ChannelRef>, GatewayError>;

    /// Channel visible only to `members` and staff
    async fn create_private_channel(
        &self,
        name: &str,
        members: &[String],
    ) -> Result<ChannelRef, GatewayError>;

    async fn delete_channel(&self, channel: &str) -> Result<(), GatewayError>;

    /// Messages in posting order
    async fn channel_history(&self, channel: &str) -> Result<Vec<String>, GatewayError>;

    async fn has_role(&self, user: &str, role: &str) -> Result<bool, GatewayError>;

    async fn grant_role(&self, user: &str, role: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, Default)]
struct Channel {
    name: String,
    private: bool,
    members: Vec<String>,
    messages: Vec<String>,
}

#[derive(Debug, Default)]
struct GatewayState {
    channels: HashMap<ChannelRef, Channel>,
    dms: Vec<(String, String)>,
    roles: HashSet<(String, String)>,
    next_channel: u64,
}

/// Process-local gateway
///
/// Keeps channels, DMs and roles in memory. `fail_next` makes the next N calls
/// fail with `Unavailable`, which is how redelivery paths get exercised.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<GatewayState>,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, op: &str) -> Result<MutexGuard<'_, GatewayState>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(op, "Injected gateway failure");
            return Err(GatewayError::Unavailable(format!("{} failed", op)));
        }
        Ok(self.lock())
    }

    pub fn fail_next(&self, calls: u32) {
        self.failures.store(calls, Ordering::SeqCst);
    }

    /// Total calls attempted, failed ones included
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Register a public channel under a fixed reference
    pub fn seed_channel(&self, channel: &str, name: &str) {
        self.lock().channels.insert(
            channel.to_string(),
            Channel {
                name: name.to_string(),
                ..Channel::default()
            },
        );
    }

    pub fn messages(&self, channel: &str) -> Vec<String> {
        self.lock()
            .channels
            .get(channel)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn dms_to(&self, user: &str) -> Vec<String> {
        self.lock()
            .dms
            .iter()
            .filter(|(to, _)| to == user)
            .map(|(_, content)| content.clone())
            .collect()
    }

    pub fn members(&self, channel: &str) -> Option<Vec<String>> {
        self.lock()
            .channels
            .get(channel)
            .filter(|c| c.private)
            .map(|c| c.members.clone())
    }
}

#[async_trait]
impl Gateway for InMemoryGateway {
    async fn send_message(&self, channel: &str, content: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("send_message")?;
        let target = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| GatewayError::ChannelNotFound(channel.to_string()))?;
        target.messages.push(content.to_string());
        debug!(channel, "Message posted");
        Ok(())
    }

    async fn send_dm(&self, user: &str, content: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("send_dm")?;
        state.dms.push((user.to_string(), content.to_string()));
        debug!(user, "DM sent");
        Ok(())
    }

    async fn channel_name(&self, channel: &str) -> Result<Option<String>, GatewayError> {
        let state = self.enter("channel_name")?;
        Ok(state.channels.get(channel).map(|c| c.name.clone()))
    }

    async fn rename_channel(&self, channel: &str, name: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("rename_channel")?;
        let target = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| GatewayError::ChannelNotFound(channel.to_string()))?;
        target.name = name.to_string();
        Ok(())
    }

    async fn find_channel(&self, name: &str) -> Result<Option<ChannelRef>, GatewayError> {
        let state = self.enter("find_channel")?;
        Ok(state
            .channels
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn create_private_channel(
        &self,
        name: &str,
        members: &[String],
    ) -> Result<ChannelRef, GatewayError> {
        let mut state = self.enter("create_private_channel")?;
        state.next_channel += 1;
        let id = format!("ch-{}", state.next_channel);
        state.channels.insert(
            id.clone(),
            Channel {
                name: name.to_string(),
                private: true,
                members: members.to_vec(),
                messages: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn delete_channel(&self, channel: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("delete_channel")?;
        state
            .channels
            .remove(channel)
            .map(|_| ())
            .ok_or_else(|| GatewayError::ChannelNotFound(channel.to_string()))
    }

    async fn channel_history(&self, channel: &str) -> Result<Vec<String>, GatewayError> {
        let state = self.enter("channel_history")?;
        state
            .channels
            .get(channel)
            .map(|c| c.messages.clone())
            .ok_or_else(|| GatewayError::ChannelNotFound(channel.to_string()))
    }

    async fn has_role(&self, user: &str, role: &str) -> Result<bool, GatewayError> {
        let state = self.enter("has_role")?;
        Ok(state.roles.contains(&(user.to_string(), role.to_string())))
    }

    async fn grant_role(&self, user: &str, role: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("grant_role")?;
        state.roles.insert((user.to_string(), role.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let gateway = InMemoryGateway::new();
        gateway.seed_channel("results", "duel-results");
        gateway.fail_next(1);

        assert!(matches!(
            gateway.send_message("results", "first").await,
            Err(GatewayError::Unavailable(_))
        ));
        gateway.send_message("results", "second").await.unwrap();

        assert_eq!(gateway.messages("results"), vec!["second".to_string()]);
        assert_eq!(gateway.call_count(), 2);
    }

    #[tokio::test]
    async fn test_private_channel_lifecycle() {
        let gateway = InMemoryGateway::new();
        let id = gateway
            .create_private_channel("ticket-7", &["carol".to_string()])
            .await
            .unwrap();

        assert_eq!(gateway.find_channel("ticket-7").await.unwrap(), Some(id.clone()));
        assert_eq!(gateway.members(&id), Some(vec!["carol".to_string()]));

        gateway.delete_channel(&id).await.unwrap();
        assert_eq!(gateway.channel_name(&id).await.unwrap(), None);
        assert!(matches!(
            gateway.delete_channel(&id).await,
            Err(GatewayError::ChannelNotFound(_))
        ));
    }
}
