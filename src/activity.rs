//! Activity counter.
//!
//! Counts messages per user and grants the active role when the counter reaches
//! the configured threshold. The grant fires on equality only, so later messages
//! never re-trigger it.

use serenity::async_trait;

use crate::discord::RoleChange;
use crate::error::Result;
use crate::filter::ListenerFilter;
use crate::pipeline::{Listener, ListenerSpec, MessageContext, Services};

/// What happened for one counted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// Counted; no threshold crossing.
    Counted(i64),
    /// Counter hit the threshold; the role grant result is attached.
    ThresholdReached(i64, RoleChange),
}

/// Increment the author's counter and grant the active role on the threshold message.
pub async fn record_message(services: &Services, guild_id: u64, user_id: u64) -> Result<ActivityOutcome> {
    let count = services.db.increment_messages(user_id).await?;
    let config = &services.config;

    if count != config.activity_threshold {
        return Ok(ActivityOutcome::Counted(count));
    }

    let Some(role_id) = config.active_role_id else {
        return Ok(ActivityOutcome::Counted(count));
    };

    let change = services
        .platform
        .ensure_role(guild_id, user_id, role_id, "Reached the activity threshold")
        .await?;

    if change == RoleChange::Added {
        tracing::info!(user_id = user_id, count = count, "Active role granted");
        services
            .platform
            .notify_user(
                user_id,
                "Thanks for being active in the community! You have been given the active role.",
            )
            .await;
    }

    Ok(ActivityOutcome::ThresholdReached(count, change))
}

/// Message-create listener counting every human guild message.
pub struct CountMessages {
    spec: ListenerSpec,
}

impl CountMessages {
    pub fn new(guild_id: Option<u64>) -> Self {
        let filter = match guild_id {
            Some(id) => ListenerFilter::new().in_guilds([id]),
            None => ListenerFilter::new(),
        };
        Self {
            spec: ListenerSpec::new("global:count-messages")
                .description("Count messages and grant the active role")
                .priority(-100)
                .filter(filter),
        }
    }
}

#[async_trait]
impl Listener<MessageContext> for CountMessages {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    async fn handle(&self, ctx: &MessageContext) -> Result<()> {
        let (Some(guild_id), Some(user_id)) = (ctx.message.guild_id, ctx.message.author_id()) else {
            return Ok(());
        };
        record_message(&ctx.services, guild_id, user_id).await?;
        Ok(())
    }
}
