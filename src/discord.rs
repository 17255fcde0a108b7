//! Chat platform boundary.
//!
//! Listeners, commands and the verification flow talk to Discord only through the
//! [`Platform`] trait. [`DiscordPlatform`] implements it over serenity's REST client.

use std::sync::Arc;

use serenity::async_trait;
use serenity::http::{Http, HttpError};
use serenity::model::channel::{Channel, ChannelFlags, GuildChannel, Message, ReactionType};
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serde_json::json;

use crate::error::{BotError, Result};
use crate::models::{Attachment, Author, MemberInfo, MessageSnapshot, ThreadEdit, ThreadInfo};

/// Outcome of [`Platform::ensure_role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    /// The role was missing and has been added.
    Added,
    /// The member already had the role; nothing was changed.
    AlreadyPresent,
    /// The user is not a member of the guild.
    NotMember,
}

/// Outbound operations against the chat platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Post a message to a channel, returning its id.
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<u64>;

    /// Reply to a message without pinging its author.
    async fn reply_to_message(&self, channel_id: u64, message_id: u64, content: &str)
        -> Result<u64>;

    async fn delete_message(&self, channel_id: u64, message_id: u64, reason: &str) -> Result<()>;

    async fn direct_message(&self, user_id: u64, content: &str) -> Result<()>;

    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str)
        -> Result<()>;

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<()>;

    /// Role ids held by a member, or `None` when the user is not in the guild.
    async fn member_roles(&self, guild_id: u64, user_id: u64) -> Result<Option<Vec<u64>>>;

    async fn fetch_message(&self, channel_id: u64, message_id: u64)
        -> Result<Option<MessageSnapshot>>;

    /// Thread metadata, or `None` when the channel is not a thread.
    async fn thread_info(&self, channel_id: u64) -> Result<Option<ThreadInfo>>;

    async fn edit_thread(&self, channel_id: u64, edit: &ThreadEdit, reason: &str) -> Result<()>;

    async fn join_thread(&self, channel_id: u64) -> Result<()>;

    async fn active_threads(&self, guild_id: u64) -> Result<Vec<ThreadInfo>>;

    /// Most recent messages in a channel, newest first.
    async fn recent_messages(&self, channel_id: u64, limit: u8) -> Result<Vec<MessageSnapshot>>;

    /// Remove every reaction with `emoji` from a message.
    async fn clear_reaction(&self, channel_id: u64, message_id: u64, emoji: &str) -> Result<()>;

    /// Grant a role only when the member does not already hold it.
    async fn ensure_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<RoleChange> {
        let Some(roles) = self.member_roles(guild_id, user_id).await? else {
            return Ok(RoleChange::NotMember);
        };
        if roles.contains(&role_id) {
            return Ok(RoleChange::AlreadyPresent);
        }
        self.add_role(guild_id, user_id, role_id, reason).await?;
        Ok(RoleChange::Added)
    }

    /// Best-effort direct message. Failures (closed DMs) are logged and reported as `false`.
    async fn notify_user(&self, user_id: u64, content: &str) -> bool {
        match self.direct_message(user_id, content).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, user_id = user_id, "Failed to send direct message");
                false
            }
        }
    }
}

/// [`Platform`] backed by serenity's HTTP client.
pub struct DiscordPlatform {
    http: Arc<Http>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Whether a serenity error is a 404 from the REST API.
fn is_not_found(err: &serenity::Error) -> bool {
    matches!(
        err,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) if resp.status_code.as_u16() == 404
    )
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<u64> {
        let message = self
            .http
            .send_message(ChannelId::new(channel_id), vec![], &json!({ "content": content }))
            .await?;
        Ok(message.id.get())
    }

    async fn reply_to_message(
        &self,
        channel_id: u64,
        message_id: u64,
        content: &str,
    ) -> Result<u64> {
        let body = json!({
            "content": content,
            "message_reference": {
                "message_id": message_id.to_string(),
                "fail_if_not_exists": false,
            },
            "allowed_mentions": { "parse": [], "replied_user": false },
        });
        let message = self
            .http
            .send_message(ChannelId::new(channel_id), vec![], &body)
            .await?;
        Ok(message.id.get())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64, reason: &str) -> Result<()> {
        self.http
            .delete_message(
                ChannelId::new(channel_id),
                MessageId::new(message_id),
                Some(reason),
            )
            .await?;
        Ok(())
    }

    async fn direct_message(&self, user_id: u64, content: &str) -> Result<()> {
        let channel = self
            .http
            .create_private_channel(&json!({ "recipient_id": user_id.to_string() }))
            .await?;
        self.http
            .send_message(channel.id, vec![], &json!({ "content": content }))
            .await?;
        Ok(())
    }

    async fn add_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<()> {
        self.http
            .add_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<()> {
        self.http
            .remove_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await?;
        Ok(())
    }

    async fn member_roles(&self, guild_id: u64, user_id: u64) -> Result<Option<Vec<u64>>> {
        match self
            .http
            .get_member(GuildId::new(guild_id), UserId::new(user_id))
            .await
        {
            Ok(member) => Ok(Some(member.roles.iter().map(|r| r.get()).collect())),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(BotError::from(e)),
        }
    }

    async fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<Option<MessageSnapshot>> {
        match self
            .http
            .get_message(ChannelId::new(channel_id), MessageId::new(message_id))
            .await
        {
            Ok(message) => Ok(Some(snapshot_from_message(&message))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(BotError::from(e)),
        }
    }

    async fn thread_info(&self, channel_id: u64) -> Result<Option<ThreadInfo>> {
        match self.http.get_channel(ChannelId::new(channel_id)).await {
            Ok(Channel::Guild(channel)) => Ok(thread_from_channel(&channel)),
            Ok(_) => Ok(None),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(BotError::from(e)),
        }
    }

    async fn edit_thread(&self, channel_id: u64, edit: &ThreadEdit, reason: &str) -> Result<()> {
        let mut body = serde_json::Map::new();
        if let Some(archived) = edit.archived {
            body.insert("archived".to_string(), json!(archived));
        }
        if let Some(locked) = edit.locked {
            body.insert("locked".to_string(), json!(locked));
        }
        if let Some(tags) = &edit.applied_tags {
            let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
            body.insert("applied_tags".to_string(), json!(tags));
        }

        self.http
            .edit_thread(ChannelId::new(channel_id), &body, Some(reason))
            .await?;
        Ok(())
    }

    async fn join_thread(&self, channel_id: u64) -> Result<()> {
        self.http
            .join_thread_channel(ChannelId::new(channel_id))
            .await?;
        Ok(())
    }

    async fn active_threads(&self, guild_id: u64) -> Result<Vec<ThreadInfo>> {
        let data = self
            .http
            .get_guild_active_threads(GuildId::new(guild_id))
            .await?;
        Ok(data.threads.iter().filter_map(thread_from_channel).collect())
    }

    async fn recent_messages(&self, channel_id: u64, limit: u8) -> Result<Vec<MessageSnapshot>> {
        let messages = self
            .http
            .get_messages(ChannelId::new(channel_id), None, Some(limit))
            .await?;
        Ok(messages.iter().map(snapshot_from_message).collect())
    }

    async fn clear_reaction(&self, channel_id: u64, message_id: u64, emoji: &str) -> Result<()> {
        self.http
            .delete_message_reaction_emoji(
                ChannelId::new(channel_id),
                MessageId::new(message_id),
                &ReactionType::Unicode(emoji.to_string()),
            )
            .await?;
        Ok(())
    }
}

/// Convert a serenity message into a crate snapshot.
pub fn snapshot_from_message(message: &Message) -> MessageSnapshot {
    MessageSnapshot {
        id: message.id.get(),
        channel_id: message.channel_id.get(),
        guild_id: message.guild_id.map(|g| g.get()),
        author: Some(Author {
            id: message.author.id.get(),
            name: message.author.name.clone(),
            bot: message.author.bot,
        }),
        content: Some(message.content.clone()),
        attachments: message
            .attachments
            .iter()
            .map(|a| Attachment {
                filename: a.filename.clone(),
                size: u64::from(a.size),
            })
            .collect(),
        member: message.member.as_ref().map(|m| MemberInfo {
            roles: m.roles.iter().map(|r| r.get()).collect(),
            permissions: m.permissions,
        }),
        mentioned_roles: message.mention_roles.iter().map(|r| r.get()).collect(),
        reference: message
            .message_reference
            .as_ref()
            .and_then(|r| r.message_id)
            .map(|id| id.get()),
    }
}

/// Thread metadata from a guild channel, `None` when it is not a thread.
pub fn thread_from_channel(channel: &GuildChannel) -> Option<ThreadInfo> {
    let metadata = channel.thread_metadata.as_ref()?;
    Some(ThreadInfo {
        id: channel.id.get(),
        parent_id: channel.parent_id.map(|p| p.get()),
        owner_id: channel.owner_id.map(|o| o.get()),
        archived: metadata.archived,
        locked: metadata.locked,
        pinned: channel.flags.contains(ChannelFlags::PINNED),
        applied_tags: channel.applied_tags.iter().map(|t| t.get()).collect(),
        last_message_id: channel.last_message_id.map(|m| m.get()),
    })
}
