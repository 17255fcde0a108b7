//! `/verify <crowdin|modrinth>`: hands out a single-use link to the OAuth flow.

use serenity::all::{CommandOptionType, CreateCommand, CreateCommandOption};
use serenity::async_trait;

use super::{CommandCategory, CommandContext, CommandMeta, SlashCommand};
use crate::error::Result;
use crate::models::ProviderKind;
use crate::verification::{self, TOKEN_TTL};

pub fn unavailable_text(provider: ProviderKind) -> String {
    format!("{} verification is not available right now.", provider.display_name())
}

pub fn link_text(provider: ProviderKind, link: &str) -> String {
    format!(
        "Open this link to link your {} account: {}\nThe link expires in {} minutes.",
        provider.display_name(),
        link,
        TOKEN_TTL.as_secs() / 60
    )
}

pub struct Verify {
    meta: CommandMeta,
}

impl Verify {
    pub fn new() -> Self {
        Self {
            meta: CommandMeta::new(
                "verify",
                "Link an external account to earn a role",
                CommandCategory::Utility,
            )
            .guild_only(),
        }
    }
}

impl Default for Verify {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlashCommand for Verify {
    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn definition(&self) -> CreateCommand {
        ProviderKind::ALL.iter().fold(
            CreateCommand::new(self.meta.name).description(self.meta.description),
            |command, provider| {
                command.add_option(CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    provider.as_str(),
                    format!("Link your {} account", provider.display_name()),
                ))
            },
        )
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let provider = ctx
            .invocation
            .subcommand
            .as_deref()
            .and_then(|s| s.parse::<ProviderKind>().ok());
        let Some(provider) = provider else {
            return ctx
                .responder
                .reply("Choose a provider: crowdin or modrinth.", true)
                .await;
        };

        let services = ctx.services;
        if !services.config.provider_enabled(provider) {
            return ctx.responder.reply(&unavailable_text(provider), true).await;
        }

        let issued = verification::issue(
            &services.db,
            &services.config,
            provider,
            ctx.invocation.user_id,
            ctx.invocation.received_at,
            None,
        )
        .await?;

        ctx.responder
            .reply(&link_text(provider, &issued.link), true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::commands::CommandInvocation;
    use crate::config::{BotConfig, OAuthClientConfig};
    use crate::testing::{services_with, MockPlatform, MockResponder};

    fn invocation(subcommand: &str) -> CommandInvocation {
        CommandInvocation {
            name: "verify".to_string(),
            user_id: 42,
            guild_id: Some(1),
            subcommand: Some(subcommand.to_string()),
            received_at: 1_000,
            ..CommandInvocation::default()
        }
    }

    #[tokio::test]
    async fn issues_link_for_enabled_provider() {
        let mut config = BotConfig::minimal("token");
        config.public_base_url = "https://bot.example.org".to_string();
        config.modrinth = Some(OAuthClientConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            scopes: String::new(),
        });
        let services = services_with(Arc::new(MockPlatform::new()), config).await;
        let responder = MockResponder::new();
        let invocation = invocation("modrinth");
        let ctx = CommandContext {
            invocation: &invocation,
            responder: &responder,
            services: &services,
        };

        Verify::new().execute(&ctx).await.expect("execute");

        let reply = responder.last().expect("reply");
        assert!(reply.ephemeral);
        assert!(reply
            .content
            .starts_with("Open this link to link your Modrinth account: https://bot.example.org/modrinth/verify?token="));
        assert!(reply.content.ends_with("The link expires in 15 minutes."));

        let token = reply
            .content
            .split("token=")
            .nth(1)
            .and_then(|rest| rest.split('\n').next())
            .expect("token in link");
        let record = services
            .db
            .find_verification(token, 1_001)
            .await
            .expect("query")
            .expect("stored");
        assert_eq!(record.discord_user_id, 42);
        assert_eq!(record.provider, ProviderKind::Modrinth);
        assert_eq!(record.expires_at, 1_000 + 15 * 60 * 1000);
    }

    #[tokio::test]
    async fn disabled_provider_is_refused() {
        let services = services_with(Arc::new(MockPlatform::new()), BotConfig::minimal("token")).await;
        let responder = MockResponder::new();
        let invocation = invocation("crowdin");
        let ctx = CommandContext {
            invocation: &invocation,
            responder: &responder,
            services: &services,
        };

        Verify::new().execute(&ctx).await.expect("execute");

        let reply = responder.last().expect("reply");
        assert_eq!(reply.content, "Crowdin verification is not available right now.");
        assert!(reply.ephemeral);
    }

    #[test]
    fn definition_lists_both_providers() {
        let json = serde_json::to_value(Verify::new().definition()).expect("serialize");
        let names: Vec<_> = json["options"]
            .as_array()
            .expect("options")
            .iter()
            .filter_map(|o| o["name"].as_str())
            .collect();
        assert_eq!(names, ["crowdin", "modrinth"]);
    }
}
