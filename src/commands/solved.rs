//! `/solved`: the thread owner marks their thread as solved.

use serenity::all::CreateCommand;
use serenity::async_trait;

use super::{CommandCategory, CommandContext, CommandMeta, SlashCommand};
use crate::error::Result;
use crate::text::MARKED_SOLVED_TEXT;
use crate::threads;

pub const NOT_A_THREAD_TEXT: &str = "This command can be only used in forum threads.";
pub const NOT_OWNER_TEXT: &str = "This command can be only executed by OP.";

pub struct Solved {
    meta: CommandMeta,
}

impl Solved {
    pub fn new() -> Self {
        Self {
            meta: CommandMeta::new("solved", "Mark current thread as solved.", CommandCategory::Utility),
        }
    }
}

impl Default for Solved {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlashCommand for Solved {
    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn definition(&self) -> CreateCommand {
        CreateCommand::new(self.meta.name).description(self.meta.description)
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let platform = ctx.services.platform.as_ref();
        let Some(thread) = platform.thread_info(ctx.invocation.channel_id).await? else {
            return ctx.responder.reply(NOT_A_THREAD_TEXT, true).await;
        };

        if !threads::is_thread_owner(platform, &thread, ctx.invocation.user_id).await? {
            return ctx.responder.reply(NOT_OWNER_TEXT, true).await;
        }

        ctx.responder.reply(MARKED_SOLVED_TEXT, false).await?;

        // Tags must be applied before archiving takes effect, so both go in one edit.
        let edit = threads::solved_edit(&ctx.services.config, &thread);
        platform
            .edit_thread(thread.id, &edit, "Thread marked as solved.")
            .await?;
        tracing::info!(thread_id = thread.id, user_id = ctx.invocation.user_id, "Thread marked as solved");
        Ok(())
    }
}
