//! Reminds thread owners to run `/solved` when their messages say the problem is gone.
//!
//! Both the create and update listeners skip starter messages and threads that
//! already carry the solved tag. The update listener also ignores edits whose
//! previous text already read as solved, so fixing a typo does not re-remind.

use std::time::Duration;

use regex::RegexSet;
use serenity::async_trait;

use crate::error::Result;
use crate::models::MessageSnapshot;
use crate::pipeline::{Listener, ListenerSpec, MessageContext, MessageUpdateContext, Services};
use crate::text::SOLVED_REMINDER_TEXT;
use crate::threads;

const REMINDER_COOLDOWN: Duration = Duration::from_secs(60);

/// Phrases that suggest an issue has been resolved.
pub struct SolvedPhrases(RegexSet);

impl SolvedPhrases {
    pub fn new() -> Result<Self> {
        Ok(Self(RegexSet::new([
            r"(?i)\b(thanks|thank you|ty|tysm|appreciate it)\b",
            r"(?i)\b(it works( now)?|fixed( now)?|resolved|issue resolved)\b",
            r"(?i)\bproblem( is)? (gone|solved|fixed)\b",
        ])?))
    }

    pub fn indicates_solved(&self, content: &str) -> bool {
        self.0.is_match(content)
    }
}

/// Shared eligibility check: owner's non-starter message in an unsolved support thread.
async fn eligible(services: &Services, message: &MessageSnapshot) -> Result<bool> {
    if message.is_thread_starter() {
        return Ok(false);
    }
    let Some(author_id) = message.author_id() else {
        return Ok(false);
    };

    let platform = services.platform.as_ref();
    let Some(thread) = threads::support_thread(platform, &services.config, message).await? else {
        return Ok(false);
    };
    if threads::is_solved(&services.config, &thread) {
        return Ok(false);
    }
    threads::is_thread_owner(platform, &thread, author_id).await
}

pub struct RemindSolvedCreate {
    spec: ListenerSpec,
    phrases: SolvedPhrases,
}

impl RemindSolvedCreate {
    pub fn new() -> Result<Self> {
        Ok(Self {
            spec: ListenerSpec::new("forum:community-support:op-solved-reminder:create")
                .description("When the owner posts a solved-like message, remind them to use /solved")
                .priority(5)
                .cooldown(REMINDER_COOLDOWN),
            phrases: SolvedPhrases::new()?,
        })
    }
}

#[async_trait]
impl Listener<MessageContext> for RemindSolvedCreate {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    async fn matches(&self, ctx: &MessageContext) -> Result<bool> {
        if !self.phrases.indicates_solved(ctx.message.text()) {
            return Ok(false);
        }
        eligible(&ctx.services, &ctx.message).await
    }

    async fn handle(&self, ctx: &MessageContext) -> Result<()> {
        ctx.services
            .platform
            .reply_to_message(ctx.message.channel_id, ctx.message.id, SOLVED_REMINDER_TEXT)
            .await?;
        Ok(())
    }
}

pub struct RemindSolvedUpdate {
    spec: ListenerSpec,
    phrases: SolvedPhrases,
}

impl RemindSolvedUpdate {
    pub fn new() -> Result<Self> {
        Ok(Self {
            spec: ListenerSpec::new("forum:community-support:op-solved-reminder:update")
                .description("When the owner edits a message to read as solved, remind them to use /solved")
                .priority(5)
                .cooldown(REMINDER_COOLDOWN),
            phrases: SolvedPhrases::new()?,
        })
    }
}

#[async_trait]
impl Listener<MessageUpdateContext> for RemindSolvedUpdate {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    async fn matches(&self, ctx: &MessageUpdateContext) -> Result<bool> {
        // Partial edits without content or author cannot be judged.
        let Some(content) = ctx.new.content.as_deref() else {
            return Ok(false);
        };
        if ctx.new.author.is_none() || ctx.new.is_thread_starter() {
            return Ok(false);
        }
        if !self.phrases.indicates_solved(content) {
            return Ok(false);
        }
        if let Some(previous) = ctx.old.as_ref().and_then(|m| m.content.as_deref()) {
            if self.phrases.indicates_solved(previous) {
                return Ok(false);
            }
        }
        eligible(&ctx.services, &ctx.new).await
    }

    async fn handle(&self, ctx: &MessageUpdateContext) -> Result<()> {
        ctx.services
            .platform
            .send_message(ctx.new.channel_id, SOLVED_REMINDER_TEXT)
            .await?;
        Ok(())
    }
}
