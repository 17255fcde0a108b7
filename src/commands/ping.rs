use serenity::all::CreateCommand;
use serenity::async_trait;

use super::{CommandCategory, CommandContext, CommandMeta, SlashCommand};
use crate::error::Result;

pub struct Ping {
    meta: CommandMeta,
}

impl Ping {
    pub fn new() -> Self {
        Self {
            meta: CommandMeta::new("ping", "Replies with Pong!", CommandCategory::General)
                .cooldown_secs(2),
        }
    }
}

impl Default for Ping {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlashCommand for Ping {
    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn definition(&self) -> CreateCommand {
        CreateCommand::new(self.meta.name).description(self.meta.description)
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()> {
        ctx.responder.reply("Pong!", false).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::commands::{CommandDispatcher, CommandInvocation, DispatchOutcome};
    use crate::config::BotConfig;
    use crate::cooldown::CooldownTracker;
    use crate::testing::{services_with, MockPlatform, MockResponder};

    #[tokio::test]
    async fn ping_pongs_with_two_second_cooldown() {
        let services = services_with(Arc::new(MockPlatform::new()), BotConfig::minimal("token")).await;
        let dispatcher = CommandDispatcher::new(Arc::new(CooldownTracker::new()), 3).register(Ping::new());
        let at = |received_at| CommandInvocation {
            name: "ping".to_string(),
            user_id: 1,
            received_at,
            ..CommandInvocation::default()
        };

        let responder = MockResponder::new();
        assert_eq!(
            dispatcher.dispatch(&at(0), &responder, &services).await,
            DispatchOutcome::Executed
        );
        assert_eq!(responder.last().map(|r| r.content), Some("Pong!".to_string()));

        let outcome = dispatcher.dispatch(&at(2_000), &MockResponder::new(), &services).await;
        assert_eq!(outcome, DispatchOutcome::Executed);
    }
}
