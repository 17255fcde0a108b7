//! Test doubles for the chat platform and interaction responses.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serenity::async_trait;

use crate::commands::Responder;
use crate::config::BotConfig;
use crate::database::Database;
use crate::discord::Platform;
use crate::error::{BotError, Result};
use crate::models::{Author, MessageSnapshot, ThreadEdit, ThreadInfo};
use crate::pipeline::Services;

/// A platform call recorded by [`MockPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    SendMessage {
        channel_id: u64,
        content: String,
    },
    Reply {
        channel_id: u64,
        message_id: u64,
        content: String,
    },
    DeleteMessage {
        channel_id: u64,
        message_id: u64,
        reason: String,
    },
    DirectMessage {
        user_id: u64,
        content: String,
    },
    AddRole {
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    },
    RemoveRole {
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    },
    EditThread {
        channel_id: u64,
        edit: ThreadEdit,
    },
    JoinThread {
        channel_id: u64,
    },
    ClearReaction {
        channel_id: u64,
        message_id: u64,
        emoji: String,
    },
}

#[derive(Default)]
struct MockState {
    calls: Vec<PlatformCall>,
    member_roles: HashMap<(u64, u64), Vec<u64>>,
    threads: HashMap<u64, ThreadInfo>,
    messages: HashMap<(u64, u64), MessageSnapshot>,
    recent: HashMap<u64, Vec<MessageSnapshot>>,
    closed_dms: HashSet<u64>,
    failing_deletes: bool,
    next_id: u64,
}

/// In-memory [`Platform`] that records every outbound call.
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().expect("mock state lock");
        f(&mut state)
    }

    pub fn set_member_roles(&self, guild_id: u64, user_id: u64, roles: Vec<u64>) {
        self.with_state(|s| {
            s.member_roles.insert((guild_id, user_id), roles);
        });
    }

    pub fn member_roles_now(&self, guild_id: u64, user_id: u64) -> Option<Vec<u64>> {
        self.with_state(|s| s.member_roles.get(&(guild_id, user_id)).cloned())
    }

    pub fn add_thread(&self, thread: ThreadInfo) {
        self.with_state(|s| {
            s.threads.insert(thread.id, thread);
        });
    }

    pub fn thread(&self, id: u64) -> Option<ThreadInfo> {
        self.with_state(|s| s.threads.get(&id).cloned())
    }

    pub fn add_message(&self, message: MessageSnapshot) {
        self.with_state(|s| {
            s.messages.insert((message.channel_id, message.id), message);
        });
    }

    /// Messages returned by `recent_messages`, newest first.
    pub fn set_recent(&self, channel_id: u64, messages: Vec<MessageSnapshot>) {
        self.with_state(|s| {
            s.recent.insert(channel_id, messages);
        });
    }

    pub fn close_dms(&self, user_id: u64) {
        self.with_state(|s| {
            s.closed_dms.insert(user_id);
        });
    }

    pub fn fail_deletes(&self) {
        self.with_state(|s| s.failing_deletes = true);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn sent_to(&self, channel_id: u64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::SendMessage { channel_id: ch, content } if ch == channel_id => {
                    Some(content)
                }
                PlatformCall::Reply {
                    channel_id: ch,
                    content,
                    ..
                } if ch == channel_id => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn direct_messages_to(&self, user_id: u64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::DirectMessage { user_id: u, content } if u == user_id => {
                    Some(content)
                }
                _ => None,
            })
            .collect()
    }

    pub fn role_grants(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, PlatformCall::AddRole { .. }))
            .count()
    }

    fn record(&self, call: PlatformCall) -> u64 {
        self.with_state(|s| {
            s.calls.push(call);
            s.next_id += 1;
            1_000_000 + s.next_id
        })
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<u64> {
        Ok(self.record(PlatformCall::SendMessage {
            channel_id,
            content: content.to_string(),
        }))
    }

    async fn reply_to_message(
        &self,
        channel_id: u64,
        message_id: u64,
        content: &str,
    ) -> Result<u64> {
        Ok(self.record(PlatformCall::Reply {
            channel_id,
            message_id,
            content: content.to_string(),
        }))
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64, reason: &str) -> Result<()> {
        if self.with_state(|s| s.failing_deletes) {
            return Err(BotError::InternalState("delete refused".to_string()));
        }
        self.record(PlatformCall::DeleteMessage {
            channel_id,
            message_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn direct_message(&self, user_id: u64, content: &str) -> Result<()> {
        if self.with_state(|s| s.closed_dms.contains(&user_id)) {
            return Err(BotError::InternalState("cannot send messages to this user".to_string()));
        }
        self.record(PlatformCall::DirectMessage {
            user_id,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64, _reason: &str) -> Result<()> {
        self.with_state(|s| {
            s.member_roles
                .entry((guild_id, user_id))
                .or_default()
                .push(role_id);
        });
        self.record(PlatformCall::AddRole {
            guild_id,
            user_id,
            role_id,
        });
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        _reason: &str,
    ) -> Result<()> {
        self.with_state(|s| {
            if let Some(roles) = s.member_roles.get_mut(&(guild_id, user_id)) {
                roles.retain(|r| *r != role_id);
            }
        });
        self.record(PlatformCall::RemoveRole {
            guild_id,
            user_id,
            role_id,
        });
        Ok(())
    }

    async fn member_roles(&self, guild_id: u64, user_id: u64) -> Result<Option<Vec<u64>>> {
        Ok(self.member_roles_now(guild_id, user_id))
    }

    async fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<Option<MessageSnapshot>> {
        Ok(self.with_state(|s| s.messages.get(&(channel_id, message_id)).cloned()))
    }

    async fn thread_info(&self, channel_id: u64) -> Result<Option<ThreadInfo>> {
        Ok(self.thread(channel_id))
    }

    async fn edit_thread(&self, channel_id: u64, edit: &ThreadEdit, _reason: &str) -> Result<()> {
        self.with_state(|s| {
            if let Some(thread) = s.threads.get_mut(&channel_id) {
                if let Some(archived) = edit.archived {
                    thread.archived = archived;
                }
                if let Some(locked) = edit.locked {
                    thread.locked = locked;
                }
                if let Some(tags) = &edit.applied_tags {
                    thread.applied_tags = tags.clone();
                }
            }
        });
        self.record(PlatformCall::EditThread {
            channel_id,
            edit: edit.clone(),
        });
        Ok(())
    }

    async fn join_thread(&self, channel_id: u64) -> Result<()> {
        self.record(PlatformCall::JoinThread { channel_id });
        Ok(())
    }

    async fn active_threads(&self, _guild_id: u64) -> Result<Vec<ThreadInfo>> {
        Ok(self.with_state(|s| s.threads.values().cloned().collect()))
    }

    async fn recent_messages(&self, channel_id: u64, limit: u8) -> Result<Vec<MessageSnapshot>> {
        Ok(self.with_state(|s| {
            s.recent
                .get(&channel_id)
                .map(|m| m.iter().take(limit as usize).cloned().collect())
                .unwrap_or_default()
        }))
    }

    async fn clear_reaction(&self, channel_id: u64, message_id: u64, emoji: &str) -> Result<()> {
        self.record(PlatformCall::ClearReaction {
            channel_id,
            message_id,
            emoji: emoji.to_string(),
        });
        Ok(())
    }
}

/// Interaction responses recorded by [`MockResponder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResponse {
    pub content: String,
    pub ephemeral: bool,
    pub follow_up: bool,
}

/// In-memory [`Responder`].
#[derive(Default)]
pub struct MockResponder {
    responses: Mutex<Vec<RecordedResponse>>,
}

impl MockResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responses(&self) -> Vec<RecordedResponse> {
        self.responses.lock().expect("responses lock").clone()
    }

    pub fn last(&self) -> Option<RecordedResponse> {
        self.responses().last().cloned()
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn reply(&self, content: &str, ephemeral: bool) -> Result<()> {
        self.responses.lock().expect("responses lock").push(RecordedResponse {
            content: content.to_string(),
            ephemeral,
            follow_up: false,
        });
        Ok(())
    }

    async fn follow_up(&self, content: &str, ephemeral: bool) -> Result<()> {
        self.responses.lock().expect("responses lock").push(RecordedResponse {
            content: content.to_string(),
            ephemeral,
            follow_up: true,
        });
        Ok(())
    }

    fn has_replied(&self) -> bool {
        !self.responses.lock().expect("responses lock").is_empty()
    }
}

/// Services backed by a mock platform and an in-memory database.
pub async fn services_with(platform: Arc<MockPlatform>, config: BotConfig) -> Services {
    let db = Database::in_memory().await.expect("in-memory db");
    Services {
        platform,
        db: Arc::new(db),
        config: Arc::new(config),
    }
}

/// A guild message from a human author.
pub fn guild_message(id: u64, channel_id: u64, author_id: u64, content: &str) -> MessageSnapshot {
    MessageSnapshot {
        id,
        channel_id,
        guild_id: Some(1),
        author: Some(Author {
            id: author_id,
            name: format!("user{}", author_id),
            bot: false,
        }),
        content: Some(content.to_string()),
        attachments: Vec::new(),
        member: None,
        mentioned_roles: Vec::new(),
        reference: None,
    }
}

/// A message written by the bot itself.
pub fn bot_message(id: u64, channel_id: u64, content: &str) -> MessageSnapshot {
    let mut message = guild_message(id, channel_id, 9, content);
    if let Some(author) = message.author.as_mut() {
        author.bot = true;
    }
    message
}
