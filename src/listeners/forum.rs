//! Community support forum listeners: greeting, product redirect and starter-deletion lock.

use regex::RegexSet;
use serenity::async_trait;

use crate::error::Result;
use crate::filter::ListenerFilter;
use crate::models::ThreadEdit;
use crate::pipeline::{Listener, ListenerSpec, MessageContext, MessageDeleteContext};
use crate::text::{GREET_TEXT, PRODUCT_SUPPORT_TEXT, STARTER_DELETED_TEXT};
use crate::threads;

/// Whether a message opens a support thread.
async fn is_support_starter(ctx: &MessageContext) -> Result<bool> {
    if !ctx.message.is_thread_starter() {
        return Ok(false);
    }
    let thread =
        threads::support_thread(ctx.services.platform.as_ref(), &ctx.services.config, &ctx.message)
            .await?;
    Ok(thread.is_some())
}

/// Greets every new support thread with usage tips.
pub struct GreetSupportThread {
    spec: ListenerSpec,
}

impl GreetSupportThread {
    pub fn new() -> Self {
        Self {
            spec: ListenerSpec::new("forum:community-support:greet")
                .description("Greet new threads in #community-support with usage and support tips"),
        }
    }
}

impl Default for GreetSupportThread {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener<MessageContext> for GreetSupportThread {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    async fn matches(&self, ctx: &MessageContext) -> Result<bool> {
        is_support_starter(ctx).await
    }

    async fn handle(&self, ctx: &MessageContext) -> Result<()> {
        ctx.services
            .platform
            .send_message(ctx.message.channel_id, GREET_TEXT)
            .await?;
        Ok(())
    }
}

/// Points product support requests to the official support portal.
pub struct ProductSupportRedirect {
    spec: ListenerSpec,
    keywords: RegexSet,
}

impl ProductSupportRedirect {
    pub fn new() -> Result<Self> {
        Ok(Self {
            spec: ListenerSpec::new("forum:community-support:check-if-modrinth-product")
                .description("Check new support threads for requests about Modrinth products"),
            keywords: RegexSet::new([
                r"(?i)\b(modrinth app|theseus_gui)\b",
                r"(?i)\b((modrinth|modrinth app|modrinth launcher) crashes)\b",
                r"(?i)\b((fetch|network|authentication|payments) error)\b",
                r"(?i)\b(failed to fetch player profile|unable to read game version tags from any source)\b",
            ])?,
        })
    }

    pub fn mentions_product(&self, content: &str) -> bool {
        self.keywords.is_match(content)
    }
}

#[async_trait]
impl Listener<MessageContext> for ProductSupportRedirect {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    async fn matches(&self, ctx: &MessageContext) -> Result<bool> {
        if !self.mentions_product(ctx.message.text()) {
            return Ok(false);
        }
        is_support_starter(ctx).await
    }

    async fn handle(&self, ctx: &MessageContext) -> Result<()> {
        ctx.services
            .platform
            .send_message(ctx.message.channel_id, PRODUCT_SUPPORT_TEXT)
            .await?;
        Ok(())
    }
}

/// Archives and locks a support thread whose starter message was deleted.
pub struct LockOnStarterDelete {
    spec: ListenerSpec,
}

impl LockOnStarterDelete {
    pub fn new() -> Self {
        Self {
            spec: ListenerSpec::new("forum:community-support:lock-on-op-delete-starter")
                .description("Lock and archive the thread when its starter message is deleted")
                .priority(10)
                .filter(ListenerFilter::new().allow_bots()),
        }
    }
}

impl Default for LockOnStarterDelete {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener<MessageDeleteContext> for LockOnStarterDelete {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    async fn matches(&self, ctx: &MessageDeleteContext) -> Result<bool> {
        if !ctx.message.is_thread_starter() {
            return Ok(false);
        }
        let thread =
            threads::support_thread(ctx.services.platform.as_ref(), &ctx.services.config, &ctx.message)
                .await?;
        Ok(thread.is_some())
    }

    async fn handle(&self, ctx: &MessageDeleteContext) -> Result<()> {
        let platform = &ctx.services.platform;
        let thread_id = ctx.message.channel_id;

        if let Err(e) = platform.send_message(thread_id, STARTER_DELETED_TEXT).await {
            tracing::warn!(error = %e, thread_id = thread_id, "Failed to post lock notice");
        }

        let Some(thread) = platform.thread_info(thread_id).await? else {
            return Ok(());
        };
        let edit = ThreadEdit {
            archived: (!thread.archived).then_some(true),
            locked: (!thread.locked).then_some(true),
            applied_tags: None,
        };
        if edit.archived.is_none() && edit.locked.is_none() {
            return Ok(());
        }

        platform
            .edit_thread(thread_id, &edit, "Starter message deleted")
            .await?;
        tracing::info!(thread_id = thread_id, "Support thread locked after starter deletion");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::BotConfig;
    use crate::models::{MessageSnapshot, ThreadInfo};
    use crate::pipeline::Services;
    use crate::testing::{guild_message, services_with, MockPlatform, PlatformCall};

    const FORUM: u64 = 300;

    fn config() -> BotConfig {
        let mut config = BotConfig::minimal("token");
        config.guild_id = Some(1);
        config.support_forum_id = Some(FORUM);
        config
    }

    async fn setup() -> (Arc<MockPlatform>, Services) {
        let platform = Arc::new(MockPlatform::new());
        platform.add_thread(ThreadInfo {
            id: 40,
            parent_id: Some(FORUM),
            owner_id: Some(5),
            ..ThreadInfo::default()
        });
        let services = services_with(platform.clone(), config()).await;
        (platform, services)
    }

    fn created(message: MessageSnapshot, services: &Services) -> MessageContext {
        MessageContext {
            message,
            received_at: 0,
            services: services.clone(),
        }
    }

    #[tokio::test]
    async fn greets_only_thread_starters() {
        let (_platform, services) = setup().await;
        let greet = GreetSupportThread::new();

        let starter = created(guild_message(40, 40, 5, "my game crashes"), &services);
        assert!(greet.matches(&starter).await.expect("match"));

        let follow_up = created(guild_message(41, 40, 5, "any ideas?"), &services);
        assert!(!greet.matches(&follow_up).await.expect("match"));
    }

    #[tokio::test]
    async fn product_redirect_needs_keywords() {
        let (platform, services) = setup().await;
        let redirect = ProductSupportRedirect::new().expect("regex compiles");

        let generic = created(guild_message(40, 40, 5, "my modpack crashes"), &services);
        assert!(!redirect.matches(&generic).await.expect("match"));

        let product = created(
            guild_message(40, 40, 5, "The Modrinth App shows a network error"),
            &services,
        );
        assert!(redirect.matches(&product).await.expect("match"));
        redirect.handle(&product).await.expect("handle");
        assert_eq!(platform.sent_to(40), vec![PRODUCT_SUPPORT_TEXT.to_string()]);
    }

    #[tokio::test]
    async fn starter_deletion_locks_thread() {
        let (platform, services) = setup().await;
        let lock = LockOnStarterDelete::new();

        let ctx = MessageDeleteContext {
            message: MessageSnapshot::partial(40, 40, Some(1)),
            received_at: 0,
            services,
        };
        assert!(lock.matches(&ctx).await.expect("match"));
        lock.handle(&ctx).await.expect("handle");

        let thread = platform.thread(40).expect("thread");
        assert!(thread.archived && thread.locked);
        assert_eq!(platform.sent_to(40), vec![STARTER_DELETED_TEXT.to_string()]);
        assert!(platform.calls().contains(&PlatformCall::EditThread {
            channel_id: 40,
            edit: ThreadEdit {
                archived: Some(true),
                locked: Some(true),
                applied_tags: None,
            },
        }));
    }

    #[tokio::test]
    async fn non_starter_deletion_is_ignored() {
        let (_platform, services) = setup().await;
        let ctx = MessageDeleteContext {
            message: MessageSnapshot::partial(41, 40, Some(1)),
            received_at: 0,
            services,
        };
        assert!(!LockOnStarterDelete::new().matches(&ctx).await.expect("match"));
    }
}
