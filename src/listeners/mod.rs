//! Listener registrations.
//!
//! The full set is built once at startup and frozen into the pipelines.

pub mod blocklist;
pub mod forum;
pub mod mod_ping;
pub mod raw_logs;
pub mod solved_reminder;

use std::sync::Arc;

use crate::activity::CountMessages;
use crate::config::BotConfig;
use crate::cooldown::CooldownTracker;
use crate::error::Result;
use crate::pipeline::{
    Listener, MessagePipeline, PipelineHooks, PipelineMode, ReactionContext, ReactionPipeline,
};

use self::blocklist::ScanForBlocklistedFiles;
use self::forum::{GreetSupportThread, LockOnStarterDelete, ProductSupportRedirect};
use self::mod_ping::ModeratorPingReminder;
use self::raw_logs::ScanForRawLogs;
use self::solved_reminder::{RemindSolvedCreate, RemindSolvedUpdate};

/// Build the message pipeline with every message listener.
pub fn message_pipeline(
    config: &BotConfig,
    cooldowns: Arc<CooldownTracker>,
    hooks: Arc<dyn PipelineHooks>,
) -> Result<MessagePipeline> {
    Ok(MessagePipeline::builder()
        .mode(PipelineMode::All)
        .cooldowns(cooldowns)
        .hooks(hooks)
        .on_create(CountMessages::new(config.guild_id))
        .on_create(ScanForBlocklistedFiles::new())
        .on_create(ScanForRawLogs::new()?)
        .on_create(GreetSupportThread::new())
        .on_create(ProductSupportRedirect::new()?)
        .on_create(RemindSolvedCreate::new()?)
        .on_update(RemindSolvedUpdate::new()?)
        .on_delete(LockOnStarterDelete::new())
        .build())
}

/// Build the reaction pipeline. Listeners needing unset roles are left out.
pub fn reaction_pipeline(
    config: &BotConfig,
    cooldowns: Arc<CooldownTracker>,
    hooks: Arc<dyn PipelineHooks>,
) -> ReactionPipeline {
    let mut add: Vec<Arc<dyn Listener<ReactionContext>>> = Vec::new();
    if let Some(role_id) = config.moderator_role_id {
        add.push(Arc::new(ModeratorPingReminder::new(role_id)));
    }

    ReactionPipeline::new(add, Vec::new(), PipelineMode::All, cooldowns, hooks)
}
