//! Gateway side effects, one handler per task type
//!
//! Handlers may run more than once for the same task. Anything that leaves
//! visible state behind (result posts, channels, renames, roles) checks the
//! current state first. DMs are sent again on redelivery; a duplicate DM is
//! preferred over a lost one.

use super::gateway::Gateway;
use crate::config::GatewayConfig;
use crate::tasks::{HandlerRegistry, Task, TaskError, TaskHandler, TaskType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// What every notification handler shares
#[derive(Clone)]
pub struct NotifyContext {
    pub gateway: Arc<dyn Gateway>,
    pub channels: GatewayConfig,
    /// Base URL for duel action links
    pub action_base_url: String,
}

impl NotifyContext {
    fn duel_link(&self, duel_id: &str) -> String {
        format!("{}/{}", self.action_base_url.trim_end_matches('/'), duel_id)
    }
}

/// Register a handler for every notification task type
pub fn register_notification_handlers(registry: &mut HandlerRegistry, ctx: NotifyContext) {
    registry.register(TaskType::CreateTicketChannel, Arc::new(CreateTicketChannelHandler(ctx.clone())));
    registry.register(TaskType::CloseTicket, Arc::new(CloseTicketHandler(ctx.clone())));
    registry.register(TaskType::PostDuelResult, Arc::new(PostDuelResultHandler(ctx.clone())));
    registry.register(TaskType::SendLinkSuccessDm, Arc::new(LinkSuccessDmHandler(ctx.clone())));
    registry.register(TaskType::SendDuelChallengeDm, Arc::new(DuelChallengeDmHandler(ctx.clone())));
    registry.register(TaskType::SendDuelAcceptedDm, Arc::new(DuelAcceptedDmHandler(ctx.clone())));
    registry.register(TaskType::SendDuelStartedDm, Arc::new(DuelStartedDmHandler(ctx.clone())));
    registry.register(TaskType::AnnounceServerStatus, Arc::new(ServerStatusHandler(ctx)));
}

fn ticket_channel_name(ticket_id: &str) -> String {
    format!("ticket-{}", ticket_id)
}

pub struct CreateTicketChannelHandler(pub NotifyContext);

#[async_trait]
impl TaskHandler for CreateTicketChannelHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let ticket = payload!(task, CreateTicketChannel);
        let gateway = &self.0.gateway;
        let name = ticket_channel_name(&ticket.ticket_id);

        let channel = match gateway.find_channel(&name).await? {
            Some(existing) => {
                if !gateway.channel_history(&existing).await?.is_empty() {
                    debug!(ticket_id = %ticket.ticket_id, "Ticket channel already set up");
                    return Ok(());
                }
                existing
            }
            None => {
                gateway
                    .create_private_channel(&name, &[ticket.user_ref.clone()])
                    .await?
            }
        };

        let intro = format!(
            "New {} ticket from <@{}> (staff: @{})\n**{}**\n{}",
            ticket.ticket_type, ticket.user_ref, self.0.channels.support_role, ticket.subject, ticket.description
        );
        gateway.send_message(&channel, &intro).await?;
        info!(ticket_id = %ticket.ticket_id, %channel, "Ticket channel opened");
        Ok(())
    }
}

pub struct CloseTicketHandler(pub NotifyContext);

#[async_trait]
impl TaskHandler for CloseTicketHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let close = payload!(task, CloseTicket);
        let gateway = &self.0.gateway;
        let archive = &self.0.channels.ticket_transcript_channel;

        if gateway.channel_name(&close.channel_ref).await?.is_some() {
            let marker = format!("[ticket:{}]", close.ticket_id);
            let exported = gateway
                .channel_history(archive)
                .await?
                .iter()
                .any(|m| m.starts_with(&marker));
            if !exported {
                let history = gateway.channel_history(&close.channel_ref).await?;
                let transcript = format!(
                    "{} closed by {}: {}\n{}",
                    marker,
                    close.closed_by,
                    close.reason,
                    history.join("\n")
                );
                gateway.send_message(archive, &transcript).await?;
            }
            gateway.delete_channel(&close.channel_ref).await?;
            info!(ticket_id = %close.ticket_id, "Ticket closed and archived");
        }

        if let Some(user) = &close.user_ref {
            let dm = format!(
                "Your ticket {} was closed by {}: {}",
                close.ticket_id, close.closed_by, close.reason
            );
            gateway.send_dm(user, &dm).await?;
        }
        Ok(())
    }
}

pub struct PostDuelResultHandler(pub NotifyContext);

#[async_trait]
impl TaskHandler for PostDuelResultHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let result = payload!(task, PostDuelResult);
        let gateway = &self.0.gateway;
        let channel = &self.0.channels.results_channel;

        let marker = format!("[duel:{}]", result.duel_id);
        if gateway
            .channel_history(channel)
            .await?
            .iter()
            .any(|m| m.starts_with(&marker))
        {
            debug!(duel_id = %result.duel_id, "Result already announced");
            return Ok(());
        }

        let scores = result
            .scores
            .as_ref()
            .map(|s| format!(" (score {})", s))
            .unwrap_or_default();
        let announcement = format!(
            "{} <@{}> beat <@{}> in {} and takes the {} pot{}",
            marker, result.winner, result.loser, result.game_id, result.pot, scores
        );
        gateway.send_message(channel, &announcement).await?;
        Ok(())
    }
}

pub struct LinkSuccessDmHandler(pub NotifyContext);

#[async_trait]
impl TaskHandler for LinkSuccessDmHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let link = payload!(task, SendLinkSuccessDm);
        let gateway = &self.0.gateway;
        let role = &self.0.channels.linked_role;

        if !gateway.has_role(&link.recipient_ref, role).await? {
            gateway.grant_role(&link.recipient_ref, role).await?;
        }
        gateway
            .send_dm(
                &link.recipient_ref,
                "Your game account is linked. You can now send and accept duels.",
            )
            .await?;
        Ok(())
    }
}

pub struct DuelChallengeDmHandler(pub NotifyContext);

#[async_trait]
impl TaskHandler for DuelChallengeDmHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let challenge = payload!(task, SendDuelChallengeDm);
        let dm = format!(
            "<@{}> challenged you to a duel for {} on {}. Accept or decline: {}",
            challenge.challenger,
            challenge.wager,
            challenge.map,
            self.0.duel_link(&challenge.duel_id)
        );
        self.0.gateway.send_dm(&challenge.recipient_ref, &dm).await?;
        Ok(())
    }
}

pub struct DuelAcceptedDmHandler(pub NotifyContext);

#[async_trait]
impl TaskHandler for DuelAcceptedDmHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let accepted = payload!(task, SendDuelAcceptedDm);
        let dm = format!(
            "Your duel with <@{}> is on. Start the match when you are ready: {}",
            accepted.opponent,
            self.0.duel_link(&accepted.duel_id)
        );
        self.0.gateway.send_dm(&accepted.recipient_ref, &dm).await?;
        Ok(())
    }
}

pub struct DuelStartedDmHandler(pub NotifyContext);

#[async_trait]
impl TaskHandler for DuelStartedDmHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let started = payload!(task, SendDuelStartedDm);
        let dm = format!(
            "<@{}> started your duel. Join the server: {}",
            started.starter, started.server_link
        );
        self.0.gateway.send_dm(&started.recipient_ref, &dm).await?;
        Ok(())
    }
}

pub struct ServerStatusHandler(pub NotifyContext);

impl ServerStatusHandler {
    /// Status channels are addressed by `<prefix><region>` and renamed to
    /// `<prefix><region>-<status>`
    fn channel_ref(&self, region: &str) -> String {
        format!("{}{}", self.0.channels.status_channel_prefix, region)
    }
}

#[async_trait]
impl TaskHandler for ServerStatusHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let status = payload!(task, AnnounceServerStatus);
        let gateway = &self.0.gateway;
        let channel = self.channel_ref(&status.region);
        let wanted = format!("{}-{}", channel, status.status);

        let current = gateway.channel_name(&channel).await?;
        if current.as_deref() != Some(wanted.as_str()) {
            gateway.rename_channel(&channel, &wanted).await?;
        }

        if !status.silent {
            let announcements = &self.0.channels.announcements_channel;
            let message = format!("Servers in {} are now {}", status.region, status.status);
            let history = gateway.channel_history(announcements).await?;
            if history.last() != Some(&message) {
                gateway.send_message(announcements, &message).await?;
            }
        }
        Ok(())
    }
}
