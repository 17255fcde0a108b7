//! Moderator-only commands: `/reset` and `/pm`.

use serenity::all::{CommandOptionType, CreateCommand, CreateCommandOption};
use serenity::async_trait;

use super::{CommandCategory, CommandContext, CommandMeta, SlashCommand, PERMISSION_ERROR_TEXT};
use crate::audit::{self, AuditEntry};
use crate::error::Result;

pub const INVALID_USER_ID_TEXT: &str = "Please provide a valid Discord user ID.";
pub const PM_SENT_TEXT: &str = "Private message has been successfully sent!";
pub const PM_UNDELIVERABLE_TEXT: &str = "The private message could not be delivered. The user may have DMs disabled.";
const DEFAULT_PM_TITLE: &str = "Message from a moderator";

fn string_option(name: &str, description: &str, required: bool) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, name, description).required(required)
}

/// Parse the `id` option as a Discord snowflake.
fn target_user(ctx: &CommandContext<'_>) -> Result<Option<u64>> {
    let raw = ctx.invocation.required_option("id")?;
    Ok(raw.trim().parse::<u64>().ok().filter(|id| *id > 0))
}

/// Render a moderator DM. Bold title line, then the message body.
pub fn format_private_message(title: Option<&str>, message: &str) -> String {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_PM_TITLE);
    format!("**{}**\n{}", title, message)
}

/// Zeroes a user's message counter and removes the active role.
pub struct Reset {
    meta: CommandMeta,
}

impl Reset {
    pub fn new() -> Self {
        Self {
            meta: CommandMeta::new(
                "reset",
                "Reset user's active role and message counter",
                CommandCategory::Moderation,
            )
            .guild_only(),
        }
    }
}

impl Default for Reset {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlashCommand for Reset {
    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn definition(&self) -> CreateCommand {
        CreateCommand::new(self.meta.name)
            .description(self.meta.description)
            .add_option(string_option("id", "Discord User ID", true))
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()> {
        if !ctx.is_moderator() {
            return ctx.responder.reply(PERMISSION_ERROR_TEXT, true).await;
        }
        let Some(user_id) = target_user(ctx)? else {
            return ctx.responder.reply(INVALID_USER_ID_TEXT, true).await;
        };

        let services = ctx.services;
        let had_counter = services.db.reset_messages(user_id).await?;

        if let (Some(guild_id), Some(role_id)) = (ctx.invocation.guild_id, services.config.active_role_id) {
            let holds_role = services
                .platform
                .member_roles(guild_id, user_id)
                .await?
                .is_some_and(|roles| roles.contains(&role_id));
            if holds_role {
                services
                    .platform
                    .remove_role(guild_id, user_id, role_id, "Activity reset by a moderator")
                    .await?;
            }
        }

        ctx.responder
            .reply(
                &format!(
                    "User's (ID: {}) active role and message counter has been reset.",
                    user_id
                ),
                false,
            )
            .await?;
        tracing::info!(
            user_id = user_id,
            moderator_id = ctx.invocation.user_id,
            moderator = %ctx.invocation.user_name,
            had_counter = had_counter,
            "User activity reset by moderator"
        );
        audit::record(
            services,
            &AuditEntry::Reset {
                user_id,
                moderator_id: ctx.invocation.user_id,
                moderator_name: &ctx.invocation.user_name,
            },
        )
        .await;
        Ok(())
    }
}

/// Sends a direct message to a user on behalf of the moderators.
pub struct PrivateMessage {
    meta: CommandMeta,
}

impl PrivateMessage {
    pub fn new() -> Self {
        Self {
            meta: CommandMeta::new("pm", "Send a private message", CommandCategory::Moderation)
                .guild_only(),
        }
    }
}

impl Default for PrivateMessage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlashCommand for PrivateMessage {
    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn definition(&self) -> CreateCommand {
        CreateCommand::new(self.meta.name)
            .description(self.meta.description)
            .add_option(string_option("id", "Discord User ID", true))
            .add_option(string_option("reason", "Reason for sending a message", true))
            .add_option(string_option("message", "Private message", true))
            .add_option(string_option("title", "Message title", false))
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()> {
        if !ctx.is_moderator() {
            return ctx.responder.reply(PERMISSION_ERROR_TEXT, true).await;
        }
        let Some(user_id) = target_user(ctx)? else {
            return ctx.responder.reply(INVALID_USER_ID_TEXT, true).await;
        };
        let reason = ctx.invocation.required_option("reason")?;
        let message = ctx.invocation.required_option("message")?;
        let content = format_private_message(ctx.invocation.option("title"), message);

        if !ctx.services.platform.notify_user(user_id, &content).await {
            return ctx.responder.reply(PM_UNDELIVERABLE_TEXT, true).await;
        }

        ctx.responder.reply(PM_SENT_TEXT, true).await?;
        tracing::info!(
            user_id = user_id,
            moderator_id = ctx.invocation.user_id,
            moderator = %ctx.invocation.user_name,
            reason = %reason,
            "Moderator sent a private message"
        );
        audit::record(
            ctx.services,
            &AuditEntry::PrivateMessage {
                user_id,
                moderator_id: ctx.invocation.user_id,
                moderator_name: &ctx.invocation.user_name,
                reason,
            },
        )
        .await;
        Ok(())
    }
}
