//! serenity event handler: turns gateway events into pipeline contexts and
//! command invocations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serenity::all::{
    ChannelId, Command, CommandDataOption, CommandDataOptionValue, CommandInteraction,
    CreateAutocompleteResponse, CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, GatewayIntents, GuildChannel, GuildId, Interaction, Message,
    MessageId, MessageUpdateEvent, Reaction, ReactionType, Ready,
};
use serenity::async_trait;
use serenity::http::Http;
use serenity::prelude::{Context, EventHandler};

use crate::commands::{CommandDispatcher, CommandInvocation, Responder};
use crate::discord::snapshot_from_message;
use crate::error::Result;
use crate::models::{MemberInfo, MessageSnapshot, ReactionSnapshot};
use crate::pipeline::{
    MessageContext, MessageDeleteContext, MessageEvent, MessagePipeline, MessageUpdateContext,
    ReactionContext, ReactionEvent, ReactionPipeline, Services,
};
use crate::threads;

/// Intents needed by the listeners and commands.
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::DIRECT_MESSAGES
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Flatten interaction options into `(subcommand, name -> value)`.
pub fn flatten_options(options: &[CommandDataOption]) -> (Option<String>, HashMap<String, String>) {
    let mut subcommand = None;
    let mut values = HashMap::new();
    collect_options(options, &mut subcommand, &mut values);
    (subcommand, values)
}

fn collect_options(
    options: &[CommandDataOption],
    subcommand: &mut Option<String>,
    values: &mut HashMap<String, String>,
) {
    for option in options {
        let value = match &option.value {
            CommandDataOptionValue::SubCommand(nested)
            | CommandDataOptionValue::SubCommandGroup(nested) => {
                *subcommand = Some(option.name.clone());
                collect_options(nested, subcommand, values);
                continue;
            }
            CommandDataOptionValue::String(s) => s.clone(),
            CommandDataOptionValue::Integer(i) => i.to_string(),
            CommandDataOptionValue::Number(n) => n.to_string(),
            CommandDataOptionValue::Boolean(b) => b.to_string(),
            CommandDataOptionValue::User(id) => id.get().to_string(),
            CommandDataOptionValue::Role(id) => id.get().to_string(),
            CommandDataOptionValue::Channel(id) => id.get().to_string(),
            CommandDataOptionValue::Autocomplete { value, .. } => value.clone(),
            _ => continue,
        };
        values.insert(option.name.clone(), value);
    }
}

fn invocation_from(command: &CommandInteraction) -> CommandInvocation {
    let (subcommand, options) = flatten_options(&command.data.options);
    CommandInvocation {
        name: command.data.name.clone(),
        user_id: command.user.id.get(),
        user_name: command.user.name.clone(),
        guild_id: command.guild_id.map(|g| g.get()),
        channel_id: command.channel_id.get(),
        member_roles: command
            .member
            .as_ref()
            .map(|m| m.roles.iter().map(|r| r.get()).collect()),
        subcommand,
        options,
        received_at: now_ms(),
    }
}

fn emoji_name(emoji: &ReactionType) -> String {
    match emoji {
        ReactionType::Unicode(s) => s.clone(),
        ReactionType::Custom { name, id, .. } => name.clone().unwrap_or_else(|| id.get().to_string()),
        other => other.to_string(),
    }
}

fn reaction_snapshot(reaction: &Reaction) -> ReactionSnapshot {
    ReactionSnapshot {
        channel_id: reaction.channel_id.get(),
        message_id: reaction.message_id.get(),
        guild_id: reaction.guild_id.map(|g| g.get()),
        user_id: reaction.user_id.map(|u| u.get()),
        user_is_bot: reaction.member.as_ref().map(|m| m.user.bot),
        member: reaction.member.as_ref().map(|m| MemberInfo {
            roles: m.roles.iter().map(|r| r.get()).collect(),
            permissions: m.permissions,
        }),
        emoji: emoji_name(&reaction.emoji),
    }
}

/// Whether a new thread belongs to the support forum.
pub fn is_support_thread(support_forum_id: Option<u64>, parent_id: Option<u64>) -> bool {
    support_forum_id.is_some() && support_forum_id == parent_id
}

/// [`Responder`] over a command interaction. The first response is the
/// interaction reply; anything after it goes out as a follow-up.
pub struct InteractionResponder {
    http: Arc<Http>,
    command: CommandInteraction,
    replied: AtomicBool,
}

impl InteractionResponder {
    pub fn new(http: Arc<Http>, command: CommandInteraction) -> Self {
        Self {
            http,
            command,
            replied: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Responder for InteractionResponder {
    async fn reply(&self, content: &str, ephemeral: bool) -> Result<()> {
        if self.replied.swap(true, Ordering::SeqCst) {
            return self.follow_up(content, ephemeral).await;
        }
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(ephemeral),
        );
        self.command.create_response(&self.http, response).await?;
        Ok(())
    }

    async fn follow_up(&self, content: &str, ephemeral: bool) -> Result<()> {
        let followup = CreateInteractionResponseFollowup::new()
            .content(content)
            .ephemeral(ephemeral);
        self.command.create_followup(&self.http, followup).await?;
        Ok(())
    }

    fn has_replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }
}

/// Routes gateway events to the pipelines and the command dispatcher.
pub struct Gateway {
    services: Services,
    messages: MessagePipeline,
    reactions: ReactionPipeline,
    commands: CommandDispatcher,
}

impl Gateway {
    pub fn new(
        services: Services,
        messages: MessagePipeline,
        reactions: ReactionPipeline,
        commands: CommandDispatcher,
    ) -> Self {
        Self {
            services,
            messages,
            reactions,
            commands,
        }
    }

    async fn handle_command(&self, ctx: &Context, command: CommandInteraction) {
        let invocation = invocation_from(&command);
        let responder = InteractionResponder::new(Arc::clone(&ctx.http), command);
        let outcome = self
            .commands
            .dispatch(&invocation, &responder, &self.services)
            .await;
        tracing::debug!(command = %invocation.name, user_id = invocation.user_id, outcome = ?outcome, "Command dispatched");
    }

    async fn handle_autocomplete(&self, ctx: &Context, command: CommandInteraction) {
        let Some(focused) = command.data.autocomplete() else {
            return;
        };
        let choices = self
            .commands
            .autocomplete(&command.data.name, focused.name, focused.value)
            .await;

        let response = choices
            .into_iter()
            .fold(CreateAutocompleteResponse::new(), |response, (name, value)| {
                response.add_string_choice(name, value)
            });
        if let Err(e) = command
            .create_response(&ctx.http, CreateInteractionResponse::Autocomplete(response))
            .await
        {
            tracing::warn!(error = %e, command = %command.data.name, "Failed to send autocomplete choices");
        }
    }

    /// Build the edited message from the update payload, fetching it when the
    /// payload carries no content.
    async fn updated_snapshot(&self, event: &MessageUpdateEvent, new: Option<Message>) -> Option<MessageSnapshot> {
        let guild_id = event.guild_id.map(|g| g.get());
        if let Some(message) = new {
            let mut snapshot = snapshot_from_message(&message);
            snapshot.guild_id = snapshot.guild_id.or(guild_id);
            return Some(snapshot);
        }

        match self
            .services
            .platform
            .fetch_message(event.channel_id.get(), event.id.get())
            .await
        {
            Ok(Some(mut snapshot)) => {
                snapshot.guild_id = snapshot.guild_id.or(guild_id);
                Some(snapshot)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, message_id = event.id.get(), "Failed to fetch edited message");
                None
            }
        }
    }
}

#[async_trait]
impl EventHandler for Gateway {
    async fn message(&self, _ctx: Context, msg: Message) {
        let event = MessageEvent::Created(MessageContext {
            message: snapshot_from_message(&msg),
            received_at: now_ms(),
            services: self.services.clone(),
        });
        self.messages.dispatch(&event).await;
    }

    async fn message_update(
        &self,
        _ctx: Context,
        old_if_available: Option<Message>,
        new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        let Some(updated) = self.updated_snapshot(&event, new).await else {
            return;
        };
        let event = MessageEvent::Updated(MessageUpdateContext {
            old: old_if_available.as_ref().map(snapshot_from_message),
            new: updated,
            received_at: now_ms(),
            services: self.services.clone(),
        });
        self.messages.dispatch(&event).await;
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        let event = MessageEvent::Deleted(MessageDeleteContext {
            message: MessageSnapshot::partial(
                deleted_message_id.get(),
                channel_id.get(),
                guild_id.map(|g| g.get()),
            ),
            received_at: now_ms(),
            services: self.services.clone(),
        });
        self.messages.dispatch(&event).await;
    }

    async fn reaction_add(&self, _ctx: Context, add_reaction: Reaction) {
        let event = ReactionEvent::Added(ReactionContext {
            reaction: reaction_snapshot(&add_reaction),
            received_at: now_ms(),
            services: self.services.clone(),
        });
        self.reactions.dispatch(&event).await;
    }

    async fn reaction_remove(&self, _ctx: Context, removed_reaction: Reaction) {
        let event = ReactionEvent::Removed(ReactionContext {
            reaction: reaction_snapshot(&removed_reaction),
            received_at: now_ms(),
            services: self.services.clone(),
        });
        self.reactions.dispatch(&event).await;
    }

    async fn thread_create(&self, _ctx: Context, thread: GuildChannel) {
        if is_support_thread(
            self.services.config.support_forum_id,
            thread.parent_id.map(|p| p.get()),
        ) {
            threads::try_join(self.services.platform.as_ref(), thread.id.get()).await;
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => self.handle_command(&ctx, command).await,
            Interaction::Autocomplete(command) => self.handle_autocomplete(&ctx, command).await,
            _ => {}
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, guilds = ready.guilds.len(), "Connected to gateway");

        let definitions = self.commands.definitions();
        let count = definitions.len();
        match Command::set_global_commands(&ctx.http, definitions).await {
            Ok(_) => tracing::info!(commands = count, "Slash commands registered"),
            Err(e) => tracing::error!(error = %e, "Failed to register slash commands"),
        }

        match threads::join_support_threads(self.services.platform.as_ref(), &self.services.config).await {
            Ok(joined) => tracing::info!(threads = joined, "Joined support threads"),
            Err(e) => tracing::warn!(error = %e, "Failed to list active threads"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn options(value: serde_json::Value) -> Vec<CommandDataOption> {
        serde_json::from_value(value).expect("options deserialize")
    }

    #[test]
    fn flattens_plain_options() {
        let (subcommand, values) = flatten_options(&options(json!([
            { "name": "id", "type": 3, "value": "sodium" },
            { "name": "count", "type": 4, "value": 7 },
            { "name": "silent", "type": 5, "value": true }
        ])));

        assert_eq!(subcommand, None);
        assert_eq!(values.get("id").map(String::as_str), Some("sodium"));
        assert_eq!(values.get("count").map(String::as_str), Some("7"));
        assert_eq!(values.get("silent").map(String::as_str), Some("true"));
    }

    #[test]
    fn records_subcommand_and_nested_options() {
        let (subcommand, values) = flatten_options(&options(json!([
            { "name": "crowdin", "type": 1, "options": [] }
        ])));
        assert_eq!(subcommand.as_deref(), Some("crowdin"));
        assert!(values.is_empty());
    }

    #[test]
    fn custom_emoji_uses_name() {
        assert_eq!(emoji_name(&ReactionType::Unicode("⚠️".to_string())), "⚠️");
        let custom: ReactionType =
            serde_json::from_value(json!({ "id": "123", "name": "blobwarn", "animated": false }))
                .expect("emoji");
        assert_eq!(emoji_name(&custom), "blobwarn");
    }

    #[test]
    fn support_threads_match_forum() {
        assert!(is_support_thread(Some(10), Some(10)));
        assert!(!is_support_thread(Some(10), Some(11)));
        assert!(!is_support_thread(None, None));
    }
}
