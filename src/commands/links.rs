//! `/docs` and `/github`: link builders for the documentation site and the organization.

use serenity::all::{CommandOptionType, CreateCommand, CreateCommandOption};
use serenity::async_trait;

use super::{CommandCategory, CommandContext, CommandMeta, SlashCommand, MAX_AUTOCOMPLETE_CHOICES};
use crate::error::Result;

const DOCS_BASE: &str = "https://docs.modrinth.com";
const GITHUB_BASE: &str = "https://github.com/modrinth";

/// Documentation pages offered by autocomplete.
const DOC_PATHS: &[&str] = &[
    "api",
    "contributing/getting-started",
    "contributing/knossos",
    "contributing/labrinth",
    "contributing/theseus",
    "contributing/daedalus",
    "contributing/minotaur",
    "guide/creator/projects",
    "guide/creator/versions",
    "guide/creator/monetization",
    "guide/creator/analytics",
    "guide/app/installing",
    "guide/app/instances",
    "modpacks",
];

/// Strip every whitespace character from a user-supplied path.
pub fn clean_path(path: &str) -> String {
    path.chars().filter(|c| !c.is_whitespace()).collect()
}

pub fn docs_url(path: &str) -> String {
    format!("{}/{}", DOCS_BASE, clean_path(path))
}

pub fn github_url(path: &str) -> String {
    format!("{}/{}", GITHUB_BASE, clean_path(path))
}

/// Known documentation paths containing `partial`, case-insensitively.
pub fn suggest_doc_paths(partial: &str) -> Vec<&'static str> {
    let needle = clean_path(partial).to_lowercase();
    DOC_PATHS
        .iter()
        .copied()
        .filter(|path| path.contains(needle.as_str()))
        .take(MAX_AUTOCOMPLETE_CHOICES)
        .collect()
}

fn path_option(description: &str, autocomplete: bool) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, "path", description)
        .required(true)
        .set_autocomplete(autocomplete)
}

pub struct Docs {
    meta: CommandMeta,
}

impl Docs {
    pub fn new() -> Self {
        Self {
            meta: CommandMeta::new(
                "docs",
                "Send a link to a documentation page",
                CommandCategory::Utility,
            )
            .cooldown_secs(3),
        }
    }
}

impl Default for Docs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlashCommand for Docs {
    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn definition(&self) -> CreateCommand {
        CreateCommand::new(self.meta.name)
            .description(self.meta.description)
            .add_option(path_option(
                "Documentation path (e.g., \"contributing/getting-started\", \"api\", \"modpacks\")",
                true,
            ))
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let path = ctx.invocation.required_option("path")?;
        ctx.responder.reply(&docs_url(path), false).await
    }

    async fn autocomplete(&self, option: &str, partial: &str) -> Result<Vec<(String, String)>> {
        if option != "path" {
            return Ok(Vec::new());
        }
        Ok(suggest_doc_paths(partial)
            .into_iter()
            .map(|p| (p.to_string(), p.to_string()))
            .collect())
    }
}

pub struct Github {
    meta: CommandMeta,
}

impl Github {
    pub fn new() -> Self {
        Self {
            meta: CommandMeta::new(
                "github",
                "Send a link to a GitHub repository",
                CommandCategory::Utility,
            )
            .cooldown_secs(3),
        }
    }
}

impl Default for Github {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlashCommand for Github {
    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn definition(&self) -> CreateCommand {
        CreateCommand::new(self.meta.name)
            .description(self.meta.description)
            .add_option(path_option(
                "Repository path (e.g., \"code\", \"code/issues\")",
                false,
            ))
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let path = ctx.invocation.required_option("path")?;
        ctx.responder.reply(&github_url(path), false).await
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

    #[test]
    fn urls_drop_whitespace() {
        assert_eq!(docs_url(" contributing / getting-started "), "https://docs.modrinth.com/contributing/getting-started");
        assert_eq!(github_url("code\t/issues"), "https://github.com/modrinth/code/issues");
    }

    #[test]
    fn suggestions_filter_by_substring() {
        let suggestions = suggest_doc_paths("CONTRIB");
        assert!(!suggestions.is_empty());
        assert!(suggestions.iter().all(|p| p.starts_with("contributing/")));
        assert_eq!(suggest_doc_paths("").len(), DOC_PATHS.len());
        assert!(suggest_doc_paths("nothing-like-this").is_empty());
    }

    #[tokio::test]
    async fn docs_replies_with_link() {
        let services = services_with(Arc::new(MockPlatform::new()), BotConfig::minimal("token")).await;
        let dispatcher = CommandDispatcher::new(Arc::new(CooldownTracker::new()), 3).register(Docs::new());
        let mut invocation = CommandInvocation {
            name: "docs".to_string(),
            user_id: 1,
            ..CommandInvocation::default()
        };
        invocation.options.insert("path".to_string(), "api".to_string());
        let responder = MockResponder::new();

        let outcome = dispatcher.dispatch(&invocation, &responder, &services).await;

        assert_eq!(outcome, DispatchOutcome::Executed);
        let reply = responder.last().expect("reply");
        assert_eq!(reply.content, "https://docs.modrinth.com/api");
        assert!(!reply.ephemeral);
    }

    #[tokio::test]
    async fn docs_autocomplete_through_dispatcher() {
        let dispatcher = CommandDispatcher::new(Arc::new(CooldownTracker::new()), 3).register(Docs::new());
        let choices = dispatcher.autocomplete("docs", "path", "mod").await;
        assert_eq!(choices, vec![("modpacks".to_string(), "modpacks".to_string())]);
        assert!(dispatcher.autocomplete("github", "path", "x").await.is_empty());
    }
}
