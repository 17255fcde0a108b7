//! `/project`: a short summary of a Modrinth project.

use std::sync::Arc;

use serenity::all::{CommandOptionType, CreateCommand, CreateCommandOption};
use serenity::async_trait;

use super::{CommandCategory, CommandContext, CommandMeta, SlashCommand};
use crate::error::Result;
use crate::text::truncate;

pub use crate::providers::modrinth::{ProjectSource, ProjectSummary};

pub const PROJECT_FETCH_FAILED_TEXT: &str = "Failed to fetch Modrinth project.";

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Plain-text rendering: title, link, description and project type.
pub fn render_project(project: &ProjectSummary) -> String {
    let mut out = format!("**{}**\n<{}>", project.title, project.url());
    if !project.description.is_empty() {
        out.push('\n');
        out.push_str(&truncate(&project.description, 300));
    }
    out.push_str(&format!("\n-# {} on Modrinth", capitalize(&project.project_type)));
    out
}

pub struct ProjectCommand {
    meta: CommandMeta,
    source: Arc<dyn ProjectSource>,
}

impl ProjectCommand {
    pub fn new(source: Arc<dyn ProjectSource>) -> Self {
        Self {
            meta: CommandMeta::new("project", "Fetch a Modrinth project", CommandCategory::Utility),
            source,
        }
    }
}

#[async_trait]
impl SlashCommand for ProjectCommand {
    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn definition(&self) -> CreateCommand {
        CreateCommand::new(self.meta.name)
            .description(self.meta.description)
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "id", "Modrinth Project ID")
                    .required(true),
            )
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let id = ctx.invocation.required_option("id")?.trim();
        match self.source.project(id).await {
            Ok(project) => ctx.responder.reply(&render_project(&project), false).await,
            Err(e) => {
                tracing::warn!(error = %e, project = %id, "Modrinth project lookup failed");
                ctx.responder.reply(PROJECT_FETCH_FAILED_TEXT, true).await
            }
        }
    }
}
