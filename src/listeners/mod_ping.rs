//! When a moderator reacts with ⚠️ to a message that pinged the moderator role,
//! clear the ⚠️ reaction and remind the author to use the report feature instead.

use serenity::async_trait;

use crate::error::Result;
use crate::filter::ListenerFilter;
use crate::pipeline::{Listener, ListenerSpec, ReactionContext};
use crate::text::{MOD_PING_MARKER, MOD_PING_TEXT};

pub const WARNING_EMOJI: &str = "⚠️";

/// How many recent messages are searched for an existing reminder.
const DUPLICATE_SCAN_LIMIT: u8 = 15;

fn is_warning_emoji(emoji: &str) -> bool {
    emoji.trim_end_matches('\u{fe0f}') == "⚠"
}

pub struct ModeratorPingReminder {
    spec: ListenerSpec,
    moderator_role_id: u64,
}

impl ModeratorPingReminder {
    pub fn new(moderator_role_id: u64) -> Self {
        Self {
            spec: ListenerSpec::new("reaction:mod-ping-reminder")
                .description("Reminds users not to ping the moderator role; use the report feature instead")
                .priority(10)
                .filter(ListenerFilter::new().require_roles([moderator_role_id])),
            moderator_role_id,
        }
    }
}

#[async_trait]
impl Listener<ReactionContext> for ModeratorPingReminder {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    async fn matches(&self, ctx: &ReactionContext) -> Result<bool> {
        Ok(is_warning_emoji(&ctx.reaction.emoji))
    }

    async fn handle(&self, ctx: &ReactionContext) -> Result<()> {
        let reaction = &ctx.reaction;
        let platform = &ctx.services.platform;

        let Some(message) = platform
            .fetch_message(reaction.channel_id, reaction.message_id)
            .await?
        else {
            return Ok(());
        };
        if !message.mentioned_roles.contains(&self.moderator_role_id) {
            return Ok(());
        }

        let recent = platform
            .recent_messages(reaction.channel_id, DUPLICATE_SCAN_LIMIT)
            .await?;
        let already_reminded = recent.iter().any(|m| {
            m.reference == Some(message.id) && m.text().to_lowercase().contains(MOD_PING_MARKER)
        });
        if already_reminded {
            return Ok(());
        }

        platform
            .clear_reaction(reaction.channel_id, reaction.message_id, &reaction.emoji)
            .await?;
        platform
            .reply_to_message(reaction.channel_id, message.id, MOD_PING_TEXT)
            .await?;
        Ok(())
    }
}
