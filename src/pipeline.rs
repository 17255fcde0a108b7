//! Listener pipeline.
//!
//! For every inbound event the pipeline walks its listeners in ascending priority
//! (registration order breaks ties) and for each one applies the filter, the
//! cooldown, the async match predicate and finally the handle effect. Failures and
//! panics are contained per listener and reported through [`PipelineHooks`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serenity::async_trait;

use crate::config::BotConfig;
use crate::cooldown::{cooldown_key, CooldownTracker};
use crate::database::Database;
use crate::discord::Platform;
use crate::error::{BotError, ErrorContext, Result};
use crate::filter::{FilterTarget, ListenerFilter};
use crate::models::{MessageSnapshot, ReactionSnapshot};

/// Collaborators handed to every listener and command.
#[derive(Clone)]
pub struct Services {
    pub platform: Arc<dyn Platform>,
    pub db: Arc<Database>,
    pub config: Arc<BotConfig>,
}

/// What the pipeline needs to know about an event context.
pub trait EventContext: Send + Sync + 'static {
    /// Event kind name used in logs.
    const KIND: &'static str;

    fn filter_target(&self) -> FilterTarget<'_>;

    /// Subject of cooldowns, normally the author or reacting user.
    fn subject_id(&self) -> Option<u64>;

    /// Capture time in epoch milliseconds.
    fn received_at(&self) -> i64;
}

/// A message was created.
pub struct MessageContext {
    pub message: MessageSnapshot,
    pub received_at: i64,
    pub services: Services,
}

/// A message was edited. `old` is whatever the platform still had cached.
pub struct MessageUpdateContext {
    pub old: Option<MessageSnapshot>,
    pub new: MessageSnapshot,
    pub received_at: i64,
    pub services: Services,
}

/// A message was deleted. The snapshot may be partial.
pub struct MessageDeleteContext {
    pub message: MessageSnapshot,
    pub received_at: i64,
    pub services: Services,
}

/// A reaction was added or removed.
pub struct ReactionContext {
    pub reaction: ReactionSnapshot,
    pub received_at: i64,
    pub services: Services,
}

fn message_target(message: &MessageSnapshot) -> FilterTarget<'_> {
    FilterTarget {
        author_id: message.author_id(),
        author_is_bot: message.author.as_ref().map(|a| a.bot),
        guild_id: message.guild_id,
        channel_id: message.channel_id,
        member: message.member.as_ref(),
    }
}

impl EventContext for MessageContext {
    const KIND: &'static str = "message_create";

    fn filter_target(&self) -> FilterTarget<'_> {
        message_target(&self.message)
    }

    fn subject_id(&self) -> Option<u64> {
        self.message.author_id()
    }

    fn received_at(&self) -> i64 {
        self.received_at
    }
}

impl EventContext for MessageUpdateContext {
    const KIND: &'static str = "message_update";

    fn filter_target(&self) -> FilterTarget<'_> {
        message_target(&self.new)
    }

    fn subject_id(&self) -> Option<u64> {
        self.new
            .author_id()
            .or_else(|| self.old.as_ref().and_then(|m| m.author_id()))
    }

    fn received_at(&self) -> i64 {
        self.received_at
    }
}

impl EventContext for MessageDeleteContext {
    const KIND: &'static str = "message_delete";

    fn filter_target(&self) -> FilterTarget<'_> {
        message_target(&self.message)
    }

    fn subject_id(&self) -> Option<u64> {
        self.message.author_id()
    }

    fn received_at(&self) -> i64 {
        self.received_at
    }
}

impl EventContext for ReactionContext {
    const KIND: &'static str = "reaction";

    fn filter_target(&self) -> FilterTarget<'_> {
        FilterTarget {
            author_id: self.reaction.user_id,
            author_is_bot: self.reaction.user_is_bot,
            guild_id: self.reaction.guild_id,
            channel_id: self.reaction.channel_id,
            member: self.reaction.member.as_ref(),
        }
    }

    fn subject_id(&self) -> Option<u64> {
        self.reaction.user_id
    }

    fn received_at(&self) -> i64 {
        self.received_at
    }
}

/// Static registration data of a listener.
#[derive(Debug, Clone)]
pub struct ListenerSpec {
    /// Stable identifier, also the cooldown key prefix.
    pub id: &'static str,
    pub description: &'static str,
    /// Lower runs first.
    pub priority: i32,
    pub cooldown: Option<Duration>,
    pub filter: ListenerFilter,
}

impl ListenerSpec {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            description: "",
            priority: 0,
            cooldown: None,
            filter: ListenerFilter::default(),
        }
    }

    pub fn description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn filter(mut self, filter: ListenerFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// A behavior reacting to one event kind.
#[async_trait]
pub trait Listener<C: EventContext>: Send + Sync {
    fn spec(&self) -> &ListenerSpec;

    /// Extra, possibly async, precondition. Errors count as "no match".
    async fn matches(&self, _ctx: &C) -> Result<bool> {
        Ok(true)
    }

    async fn handle(&self, ctx: &C) -> Result<()>;
}

/// Whether a pass stops at the first successfully handled listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    First,
    #[default]
    All,
}

/// Identifies the listener an outcome belongs to.
#[derive(Debug, Clone, Copy)]
pub struct HookEvent {
    pub kind: &'static str,
    pub listener_id: &'static str,
    pub subject_id: Option<u64>,
    pub guild_id: Option<u64>,
}

/// Observer for listener outcomes.
pub trait PipelineHooks: Send + Sync {
    fn on_handled(&self, _event: &HookEvent) {}

    fn on_match_error(&self, event: &HookEvent, error: &BotError);

    fn on_error(&self, event: &HookEvent, error: &BotError);
}

/// Default hooks: structured logs through tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHooks;

fn error_context(event: &HookEvent, prefix: &str) -> ErrorContext {
    let mut context = ErrorContext::new(format!("{}:{}:{}", prefix, event.kind, event.listener_id));
    if let Some(user_id) = event.subject_id {
        context = context.with_user_id(user_id);
    }
    if let Some(guild_id) = event.guild_id {
        context = context.with_guild_id(guild_id);
    }
    context
}

impl PipelineHooks for TracingHooks {
    fn on_handled(&self, event: &HookEvent) {
        tracing::debug!(
            kind = event.kind,
            listener = event.listener_id,
            subject_id = ?event.subject_id,
            "Listener handled event"
        );
    }

    fn on_match_error(&self, event: &HookEvent, error: &BotError) {
        tracing::warn!(
            error = %error,
            kind = event.kind,
            listener = event.listener_id,
            subject_id = ?event.subject_id,
            "Listener match predicate failed, treating as no match"
        );
    }

    fn on_error(&self, event: &HookEvent, error: &BotError) {
        error.log_with_context(&error_context(event, "listener"));
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub handled: Vec<&'static str>,
    pub failed: Vec<&'static str>,
    pub throttled: Vec<&'static str>,
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Ordered listeners for one event kind.
pub struct Pipeline<C: EventContext> {
    listeners: Vec<Arc<dyn Listener<C>>>,
    mode: PipelineMode,
    cooldowns: Arc<CooldownTracker>,
    hooks: Arc<dyn PipelineHooks>,
}

impl<C: EventContext> Pipeline<C> {
    /// Build a pipeline. Listeners are stably sorted by priority.
    pub fn new(
        mut listeners: Vec<Arc<dyn Listener<C>>>,
        mode: PipelineMode,
        cooldowns: Arc<CooldownTracker>,
        hooks: Arc<dyn PipelineHooks>,
    ) -> Self {
        listeners.sort_by_key(|l| l.spec().priority);
        Self {
            listeners,
            mode,
            cooldowns,
            hooks,
        }
    }

    /// Listener ids in execution order.
    pub fn listener_ids(&self) -> Vec<&'static str> {
        self.listeners.iter().map(|l| l.spec().id).collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Run one pass over the listeners. Never fails; problems go to the hooks.
    pub async fn dispatch(&self, ctx: &C) -> DispatchReport {
        let mut report = DispatchReport::default();
        let target = ctx.filter_target();

        for listener in &self.listeners {
            let spec = listener.spec();
            let event = HookEvent {
                kind: C::KIND,
                listener_id: spec.id,
                subject_id: ctx.subject_id(),
                guild_id: target.guild_id,
            };

            if !spec.filter.passes(&target) {
                continue;
            }

            if let Some(cooldown) = spec.cooldown {
                // No subject means the cooldown cannot be enforced, so skip.
                let Some(subject_id) = ctx.subject_id() else {
                    continue;
                };
                let key = cooldown_key(spec.id, subject_id);
                let decision =
                    self.cooldowns
                        .try_consume(&key, cooldown.as_millis() as i64, ctx.received_at());
                if !decision.is_allowed() {
                    report.throttled.push(spec.id);
                    continue;
                }
            }

            match AssertUnwindSafe(listener.matches(ctx)).catch_unwind().await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => continue,
                Ok(Err(e)) => {
                    self.hooks.on_match_error(&event, &e);
                    continue;
                }
                Err(payload) => {
                    self.hooks
                        .on_match_error(&event, &BotError::Panicked(panic_message(payload)));
                    continue;
                }
            }

            let outcome = match AssertUnwindSafe(listener.handle(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(BotError::Panicked(panic_message(payload))),
            };

            match outcome {
                Ok(()) => {
                    report.handled.push(spec.id);
                    self.hooks.on_handled(&event);
                    if self.mode == PipelineMode::First {
                        break;
                    }
                }
                Err(e) => {
                    report.failed.push(spec.id);
                    self.hooks.on_error(&event, &e);
                }
            }
        }

        report
    }
}

/// Message events as a tagged union, one payload shape per kind.
pub enum MessageEvent {
    Created(MessageContext),
    Updated(MessageUpdateContext),
    Deleted(MessageDeleteContext),
}

/// Reaction events.
pub enum ReactionEvent {
    Added(ReactionContext),
    Removed(ReactionContext),
}

/// Pipelines for message create, update and delete sharing one cooldown map.
pub struct MessagePipeline {
    create: Pipeline<MessageContext>,
    update: Pipeline<MessageUpdateContext>,
    delete: Pipeline<MessageDeleteContext>,
}

impl MessagePipeline {
    pub fn builder() -> MessagePipelineBuilder {
        MessagePipelineBuilder::default()
    }

    pub async fn dispatch(&self, event: &MessageEvent) -> DispatchReport {
        match event {
            MessageEvent::Created(ctx) => self.create.dispatch(ctx).await,
            MessageEvent::Updated(ctx) => self.update.dispatch(ctx).await,
            MessageEvent::Deleted(ctx) => self.delete.dispatch(ctx).await,
        }
    }

    pub fn create_listener_ids(&self) -> Vec<&'static str> {
        self.create.listener_ids()
    }

    pub fn update_listener_ids(&self) -> Vec<&'static str> {
        self.update.listener_ids()
    }

    pub fn delete_listener_ids(&self) -> Vec<&'static str> {
        self.delete.listener_ids()
    }
}

/// Collects listener registrations before they are frozen into a [`MessagePipeline`].
#[derive(Default)]
pub struct MessagePipelineBuilder {
    mode: PipelineMode,
    cooldowns: Option<Arc<CooldownTracker>>,
    hooks: Option<Arc<dyn PipelineHooks>>,
    create: Vec<Arc<dyn Listener<MessageContext>>>,
    update: Vec<Arc<dyn Listener<MessageUpdateContext>>>,
    delete: Vec<Arc<dyn Listener<MessageDeleteContext>>>,
}

impl MessagePipelineBuilder {
    pub fn mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cooldowns(mut self, cooldowns: Arc<CooldownTracker>) -> Self {
        self.cooldowns = Some(cooldowns);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn PipelineHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn on_create(mut self, listener: impl Listener<MessageContext> + 'static) -> Self {
        self.create.push(Arc::new(listener));
        self
    }

    pub fn on_update(mut self, listener: impl Listener<MessageUpdateContext> + 'static) -> Self {
        self.update.push(Arc::new(listener));
        self
    }

    pub fn on_delete(mut self, listener: impl Listener<MessageDeleteContext> + 'static) -> Self {
        self.delete.push(Arc::new(listener));
        self
    }

    pub fn build(self) -> MessagePipeline {
        let cooldowns = self.cooldowns.unwrap_or_default();
        let hooks: Arc<dyn PipelineHooks> = self.hooks.unwrap_or_else(|| Arc::new(TracingHooks));

        MessagePipeline {
            create: Pipeline::new(self.create, self.mode, Arc::clone(&cooldowns), Arc::clone(&hooks)),
            update: Pipeline::new(self.update, self.mode, Arc::clone(&cooldowns), Arc::clone(&hooks)),
            delete: Pipeline::new(self.delete, self.mode, cooldowns, hooks),
        }
    }
}

/// Pipelines for reaction add and remove.
pub struct ReactionPipeline {
    add: Pipeline<ReactionContext>,
    remove: Pipeline<ReactionContext>,
}

impl ReactionPipeline {
    pub fn new(
        add: Vec<Arc<dyn Listener<ReactionContext>>>,
        remove: Vec<Arc<dyn Listener<ReactionContext>>>,
        mode: PipelineMode,
        cooldowns: Arc<CooldownTracker>,
        hooks: Arc<dyn PipelineHooks>,
    ) -> Self {
        Self {
            add: Pipeline::new(add, mode, Arc::clone(&cooldowns), Arc::clone(&hooks)),
            remove: Pipeline::new(remove, mode, cooldowns, hooks),
        }
    }

    pub async fn dispatch(&self, event: &ReactionEvent) -> DispatchReport {
        match event {
            ReactionEvent::Added(ctx) => self.add.dispatch(ctx).await,
            ReactionEvent::Removed(ctx) => self.remove.dispatch(ctx).await,
        }
    }

    pub fn add_listener_ids(&self) -> Vec<&'static str> {
        self.add.listener_ids()
    }
}
