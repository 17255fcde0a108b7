//! Slash command dispatcher.
//!
//! Commands are registered once into a [`CommandDispatcher`]. Each invocation
//! goes through the gates (DM only, guild only, guild and user allow-lists),
//! the per-user cooldown and finally the command itself. The dispatcher is the
//! containment boundary: a failing or panicking command gets a generic
//! ephemeral reply and never reaches the gateway.

pub mod links;
pub mod moderation;
pub mod ping;
pub mod project;
pub mod solved;
pub mod verify;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serenity::all::{CreateCommand, Permissions};
use serenity::async_trait;

use crate::audit;
use crate::cooldown::CooldownTracker;
use crate::error::{BotError, ErrorContext, Result};
use crate::pipeline::{panic_message, Services};
use crate::text::COMMAND_FAILED_TEXT;

/// Shown to members missing the moderator role.
pub const PERMISSION_ERROR_TEXT: &str = "You do not have permission to use this command.";

/// Most autocomplete choices the platform accepts.
pub const MAX_AUTOCOMPLETE_CHOICES: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    General,
    Utility,
    Moderation,
}

/// Declarative shape of a command, used for gating and registration.
#[derive(Debug, Clone)]
pub struct CommandMeta {
    pub name: &'static str,
    pub description: &'static str,
    pub category: CommandCategory,
    pub guild_only: bool,
    pub dm_only: bool,
    pub allowed_guilds: Option<Vec<u64>>,
    pub allowed_users: Option<Vec<u64>>,
    /// `None` uses the dispatcher default; `Some(0)` disables the cooldown.
    pub cooldown_secs: Option<u64>,
    pub default_member_permissions: Option<Permissions>,
}

impl CommandMeta {
    pub fn new(name: &'static str, description: &'static str, category: CommandCategory) -> Self {
        Self {
            name,
            description,
            category,
            guild_only: false,
            dm_only: false,
            allowed_guilds: None,
            allowed_users: None,
            cooldown_secs: None,
            default_member_permissions: None,
        }
    }

    pub fn guild_only(mut self) -> Self {
        self.guild_only = true;
        self
    }

    pub fn dm_only(mut self) -> Self {
        self.dm_only = true;
        self
    }

    pub fn allowed_guilds(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.allowed_guilds = Some(ids.into_iter().collect());
        self
    }

    pub fn allowed_users(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.allowed_users = Some(ids.into_iter().collect());
        self
    }

    pub fn cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = Some(secs);
        self
    }

    pub fn default_member_permissions(mut self, permissions: Permissions) -> Self {
        self.default_member_permissions = Some(permissions);
        self
    }
}

/// One slash command invocation, decoupled from the gateway payload.
#[derive(Debug, Clone, Default)]
pub struct CommandInvocation {
    pub name: String,
    pub user_id: u64,
    pub user_name: String,
    pub guild_id: Option<u64>,
    pub channel_id: u64,
    /// Roles of the invoking member; `None` outside guilds.
    pub member_roles: Option<Vec<u64>>,
    pub subcommand: Option<String>,
    pub options: HashMap<String, String>,
    /// Epoch milliseconds.
    pub received_at: i64,
}

impl CommandInvocation {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn required_option(&self, name: &str) -> Result<&str> {
        self.option(name)
            .ok_or_else(|| BotError::InternalState(format!("missing required option `{}`", name)))
    }

    pub fn has_role(&self, role_id: u64) -> bool {
        self.member_roles
            .as_ref()
            .is_some_and(|roles| roles.contains(&role_id))
    }
}

/// Replies to the interaction that triggered a command.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn reply(&self, content: &str, ephemeral: bool) -> Result<()>;

    async fn follow_up(&self, content: &str, ephemeral: bool) -> Result<()>;

    /// Whether an initial response was already sent.
    fn has_replied(&self) -> bool;
}

/// Everything a command sees while executing.
pub struct CommandContext<'a> {
    pub invocation: &'a CommandInvocation,
    pub responder: &'a dyn Responder,
    pub services: &'a Services,
}

impl CommandContext<'_> {
    /// Whether the invoker holds the configured moderator role.
    pub fn is_moderator(&self) -> bool {
        self.services
            .config
            .moderator_role_id
            .is_some_and(|role| self.invocation.has_role(role))
    }
}

#[async_trait]
pub trait SlashCommand: Send + Sync {
    fn meta(&self) -> &CommandMeta;

    /// Registration payload (name, description and options).
    fn definition(&self) -> CreateCommand;

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()>;

    /// Choices for the focused option. Most commands have none.
    async fn autocomplete(&self, _option: &str, _partial: &str) -> Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }
}

/// Which gate rejected an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    DmOnly,
    GuildOnly,
    GuildNotAllowed,
    UserNotAllowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Unknown,
    Rejected(Gate),
    CoolingDown { retry_after_secs: u64 },
    Executed,
    Failed,
}

pub struct CommandDispatcher {
    commands: HashMap<&'static str, Arc<dyn SlashCommand>>,
    cooldowns: Arc<CooldownTracker>,
    default_cooldown_secs: u64,
}

impl CommandDispatcher {
    pub fn new(cooldowns: Arc<CooldownTracker>, default_cooldown_secs: u64) -> Self {
        Self {
            commands: HashMap::new(),
            cooldowns,
            default_cooldown_secs,
        }
    }

    /// Register a command. A later command with the same name replaces the earlier one.
    pub fn register(mut self, command: impl SlashCommand + 'static) -> Self {
        let name = command.meta().name;
        if self.commands.insert(name, Arc::new(command)).is_some() {
            tracing::warn!(command = name, "Command registered twice; keeping the last one");
        }
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SlashCommand>> {
        self.commands.get(name)
    }

    /// Registration payloads for every command, sorted by name.
    pub fn definitions(&self) -> Vec<CreateCommand> {
        self.names()
            .into_iter()
            .filter_map(|name| self.commands.get(name))
            .map(|command| {
                let definition = command.definition();
                match command.meta().default_member_permissions {
                    Some(permissions) => definition.default_member_permissions(permissions),
                    None => definition,
                }
            })
            .collect()
    }

    fn check_gates(meta: &CommandMeta, invocation: &CommandInvocation) -> Option<Gate> {
        if meta.dm_only && invocation.guild_id.is_some() {
            return Some(Gate::DmOnly);
        }
        if meta.guild_only && invocation.guild_id.is_none() {
            return Some(Gate::GuildOnly);
        }
        if let Some(allowed) = &meta.allowed_guilds {
            if !invocation.guild_id.is_some_and(|id| allowed.contains(&id)) {
                return Some(Gate::GuildNotAllowed);
            }
        }
        if let Some(allowed) = &meta.allowed_users {
            if !allowed.contains(&invocation.user_id) {
                return Some(Gate::UserNotAllowed);
            }
        }
        None
    }

    /// Run one invocation through the gates, the cooldown and the command.
    pub async fn dispatch(
        &self,
        invocation: &CommandInvocation,
        responder: &dyn Responder,
        services: &Services,
    ) -> DispatchOutcome {
        let Some(command) = self.commands.get(invocation.name.as_str()) else {
            tracing::debug!(command = %invocation.name, "Unknown command");
            return DispatchOutcome::Unknown;
        };
        let meta = command.meta();

        if let Some(gate) = Self::check_gates(meta, invocation) {
            tracing::debug!(command = meta.name, user_id = invocation.user_id, gate = ?gate, "Command rejected");
            return DispatchOutcome::Rejected(gate);
        }

        let cooldown_secs = meta.cooldown_secs.unwrap_or(self.default_cooldown_secs);
        if cooldown_secs > 0 {
            let key = format!("{}:{}", invocation.user_id, meta.name);
            let decision = self.cooldowns.try_consume(
                &key,
                (cooldown_secs * 1000) as i64,
                invocation.received_at,
            );
            if let crate::cooldown::CooldownDecision::Limited { retry_after_ms } = decision {
                let retry_after_secs = ((retry_after_ms.max(1) + 999) / 1000) as u64;
                if !responder.has_replied() {
                    let content = format!(
                        "Please wait {}s before using /{} again.",
                        retry_after_secs, meta.name
                    );
                    if let Err(e) = responder.reply(&content, true).await {
                        tracing::warn!(error = %e, command = meta.name, "Failed to send cooldown notice");
                    }
                }
                return DispatchOutcome::CoolingDown { retry_after_secs };
            }
        }

        let ctx = CommandContext {
            invocation,
            responder,
            services,
        };
        let result = match AssertUnwindSafe(command.execute(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(BotError::Panicked(panic_message(payload))),
        };

        match result {
            Ok(()) => DispatchOutcome::Executed,
            Err(e) => {
                let mut context = ErrorContext::new(format!("command:{}", meta.name))
                    .with_user_id(invocation.user_id);
                if let Some(guild_id) = invocation.guild_id {
                    context = context.with_guild_id(guild_id);
                }
                e.log_with_context(&context);
                audit::record_error(services, &context.operation, &e).await;

                let sent = if responder.has_replied() {
                    responder.follow_up(COMMAND_FAILED_TEXT, true).await
                } else {
                    responder.reply(COMMAND_FAILED_TEXT, true).await
                };
                if let Err(e) = sent {
                    tracing::warn!(error = %e, command = meta.name, "Failed to report command error");
                }
                DispatchOutcome::Failed
            }
        }
    }

    /// Autocomplete choices for a command's focused option.
    pub async fn autocomplete(
        &self,
        name: &str,
        option: &str,
        partial: &str,
    ) -> Vec<(String, String)> {
        let Some(command) = self.commands.get(name) else {
            return Vec::new();
        };
        match command.autocomplete(option, partial).await {
            Ok(mut choices) => {
                choices.truncate(MAX_AUTOCOMPLETE_CHOICES);
                choices
            }
            Err(e) => {
                tracing::warn!(error = %e, command = name, "Autocomplete failed");
                Vec::new()
            }
        }
    }
}

/// The full command set.
pub fn default_dispatcher(
    config: &crate::config::BotConfig,
    cooldowns: Arc<CooldownTracker>,
    projects: Arc<dyn project::ProjectSource>,
) -> CommandDispatcher {
    CommandDispatcher::new(cooldowns, config.default_command_cooldown_secs)
        .register(ping::Ping::new())
        .register(links::Docs::new())
        .register(links::Github::new())
        .register(solved::Solved::new())
        .register(verify::Verify::new())
        .register(moderation::Reset::new())
        .register(moderation::PrivateMessage::new())
        .register(project::ProjectCommand::new(projects))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::BotConfig;
    use crate::testing::{services_with, MockPlatform, MockResponder};

    struct StubCommand {
        meta: CommandMeta,
        runs: AtomicUsize,
        fail: bool,
        panic: bool,
        reply_first: bool,
    }

    impl StubCommand {
        fn new(meta: CommandMeta) -> Self {
            Self {
                meta,
                runs: AtomicUsize::new(0),
                fail: false,
                panic: false,
                reply_first: false,
            }
        }
    }

    #[async_trait]
    impl SlashCommand for StubCommand {
        fn meta(&self) -> &CommandMeta {
            &self.meta
        }

        fn definition(&self) -> CreateCommand {
            CreateCommand::new(self.meta.name).description(self.meta.description)
        }

        async fn execute(&self, ctx: &CommandContext<'_>) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.reply_first {
                ctx.responder.reply("working on it", false).await?;
            }
            if self.panic {
                panic!("stub exploded");
            }
            if self.fail {
                return Err(BotError::Provider("secret upstream detail".to_string()));
            }
            ctx.responder.reply("done", false).await
        }
    }

    fn invocation(name: &str, guild_id: Option<u64>, at: i64) -> CommandInvocation {
        CommandInvocation {
            name: name.to_string(),
            user_id: 7,
            user_name: "user7".to_string(),
            guild_id,
            channel_id: 20,
            received_at: at,
            ..CommandInvocation::default()
        }
    }

    async fn services() -> Services {
        services_with(Arc::new(MockPlatform::new()), BotConfig::minimal("token")).await
    }

    fn dispatcher(stub: StubCommand) -> CommandDispatcher {
        CommandDispatcher::new(Arc::new(CooldownTracker::new()), 3).register(stub)
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let services = services().await;
        let responder = MockResponder::new();
        let outcome = dispatcher(StubCommand::new(CommandMeta::new("stub", "p", CommandCategory::General)))
            .dispatch(&invocation("missing", Some(1), 0), &responder, &services)
            .await;
        assert_eq!(outcome, DispatchOutcome::Unknown);
        assert!(responder.responses().is_empty());
    }

    #[tokio::test]
    async fn gates_reject_silently_in_order() {
        let services = services().await;
        let cases = [
            (
                CommandMeta::new("stub", "p", CommandCategory::General).dm_only(),
                Some(1),
                Gate::DmOnly,
            ),
            (
                CommandMeta::new("stub", "p", CommandCategory::General).guild_only(),
                None,
                Gate::GuildOnly,
            ),
            (
                CommandMeta::new("stub", "p", CommandCategory::General).allowed_guilds([2]),
                Some(1),
                Gate::GuildNotAllowed,
            ),
            (
                CommandMeta::new("stub", "p", CommandCategory::General)
                    .allowed_guilds([1])
                    .allowed_users([99]),
                Some(1),
                Gate::UserNotAllowed,
            ),
        ];

        for (meta, guild_id, gate) in cases {
            let responder = MockResponder::new();
            let outcome = dispatcher(StubCommand::new(meta))
                .dispatch(&invocation("stub", guild_id, 0), &responder, &services)
                .await;
            assert_eq!(outcome, DispatchOutcome::Rejected(gate));
            assert!(responder.responses().is_empty());
        }
    }

    #[tokio::test]
    async fn cooldown_replies_with_remaining_seconds() {
        let services = services().await;
        let dispatcher = dispatcher(StubCommand::new(
            CommandMeta::new("stub", "p", CommandCategory::General).cooldown_secs(5),
        ));

        let first = MockResponder::new();
        assert_eq!(
            dispatcher.dispatch(&invocation("stub", Some(1), 0), &first, &services).await,
            DispatchOutcome::Executed
        );

        let second = MockResponder::new();
        let outcome = dispatcher
            .dispatch(&invocation("stub", Some(1), 1_200), &second, &services)
            .await;
        assert_eq!(outcome, DispatchOutcome::CoolingDown { retry_after_secs: 4 });
        let reply = second.last().expect("cooldown notice");
        assert_eq!(reply.content, "Please wait 4s before using /stub again.");
        assert!(reply.ephemeral);

        let third = MockResponder::new();
        assert_eq!(
            dispatcher.dispatch(&invocation("stub", Some(1), 5_000), &third, &services).await,
            DispatchOutcome::Executed
        );
    }

    #[tokio::test]
    async fn default_cooldown_applies_and_zero_disables() {
        let services = services().await;
        let defaulted = dispatcher(StubCommand::new(CommandMeta::new("stub", "p", CommandCategory::General)));
        let responder = MockResponder::new();
        defaulted.dispatch(&invocation("stub", None, 0), &responder, &services).await;
        let outcome = defaulted
            .dispatch(&invocation("stub", None, 2_999), &MockResponder::new(), &services)
            .await;
        assert_eq!(outcome, DispatchOutcome::CoolingDown { retry_after_secs: 1 });

        let uncapped = dispatcher(StubCommand::new(
            CommandMeta::new("stub", "p", CommandCategory::General).cooldown_secs(0),
        ));
        for at in [0, 1, 2] {
            let outcome = uncapped
                .dispatch(&invocation("stub", None, at), &MockResponder::new(), &services)
                .await;
            assert_eq!(outcome, DispatchOutcome::Executed);
        }
    }

    #[tokio::test]
    async fn failures_get_generic_ephemeral_reply() {
        let services = services().await;
        let mut stub = StubCommand::new(CommandMeta::new("stub", "p", CommandCategory::General));
        stub.fail = true;
        let responder = MockResponder::new();

        let outcome = dispatcher(stub)
            .dispatch(&invocation("stub", Some(1), 0), &responder, &services)
            .await;

        assert_eq!(outcome, DispatchOutcome::Failed);
        let reply = responder.last().expect("error reply");
        assert_eq!(reply.content, COMMAND_FAILED_TEXT);
        assert!(reply.ephemeral && !reply.follow_up);
        assert!(!reply.content.contains("secret"));
    }

    #[tokio::test]
    async fn failure_after_reply_uses_follow_up() {
        let services = services().await;
        let mut stub = StubCommand::new(CommandMeta::new("stub", "p", CommandCategory::General));
        stub.reply_first = true;
        stub.panic = true;
        let responder = MockResponder::new();

        let outcome = dispatcher(stub)
            .dispatch(&invocation("stub", Some(1), 0), &responder, &services)
            .await;

        assert_eq!(outcome, DispatchOutcome::Failed);
        let reply = responder.last().expect("error follow-up");
        assert_eq!(reply.content, COMMAND_FAILED_TEXT);
        assert!(reply.follow_up && reply.ephemeral);
    }

    #[tokio::test]
    async fn critical_failures_reach_the_log_channel() {
        let platform = Arc::new(MockPlatform::new());
        let mut config = BotConfig::minimal("token");
        config.log_channel_id = Some(555);
        let services = services_with(platform.clone(), config).await;

        let mut stub = StubCommand::new(CommandMeta::new("stub", "p", CommandCategory::General));
        stub.panic = true;
        let outcome = dispatcher(stub)
            .dispatch(&invocation("stub", Some(1), 0), &MockResponder::new(), &services)
            .await;

        assert_eq!(outcome, DispatchOutcome::Failed);
        let logged = platform.sent_to(555);
        assert_eq!(logged.len(), 1);
        assert!(logged[0].starts_with("**Unknown Error:** `command:stub` Handler panicked"));
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let dispatcher = CommandDispatcher::new(Arc::new(CooldownTracker::new()), 3)
            .register(StubCommand::new(CommandMeta::new("zeta", "z", CommandCategory::General)))
            .register(StubCommand::new(CommandMeta::new("alpha", "a", CommandCategory::General)));

        let names: Vec<String> = dispatcher
            .definitions()
            .iter()
            .map(|d| {
                serde_json::to_value(d).expect("serializable")["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn default_set_registers_every_command() {
        struct NoProjects;

        #[async_trait]
        impl project::ProjectSource for NoProjects {
            async fn project(&self, _id: &str) -> Result<project::ProjectSummary> {
                Err(BotError::Provider("offline".to_string()))
            }
        }

        let dispatcher = default_dispatcher(
            &BotConfig::minimal("token"),
            Arc::new(CooldownTracker::new()),
            Arc::new(NoProjects),
        );
        assert_eq!(
            dispatcher.names(),
            vec!["docs", "github", "ping", "pm", "project", "reset", "solved", "verify"]
        );
    }
}
