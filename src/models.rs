//! Core data models for the bot.
//!
//! Gateway payloads are converted into these snapshots at the edge so listeners,
//! filters and tests never depend on serenity's cache or model internals.

use serenity::model::permissions::Permissions;

/// Who wrote a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: u64,
    pub name: String,
    pub bot: bool,
}

/// Guild membership context attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberInfo {
    pub roles: Vec<u64>,
    /// Resolved permissions, when the gateway supplied them.
    pub permissions: Option<Permissions>,
}

impl MemberInfo {
    pub fn has_role(&self, role_id: u64) -> bool {
        self.roles.contains(&role_id)
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
}

/// Immutable view of a message at the time an event was received.
///
/// Partial snapshots (deleted or uncached messages) leave `author` and `content` empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    pub id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author: Option<Author>,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
    pub member: Option<MemberInfo>,
    pub mentioned_roles: Vec<u64>,
    /// Id of the message this one replies to.
    pub reference: Option<u64>,
}

impl MessageSnapshot {
    /// A partial snapshot carrying only identifiers.
    pub fn partial(id: u64, channel_id: u64, guild_id: Option<u64>) -> Self {
        Self {
            id,
            channel_id,
            guild_id,
            author: None,
            content: None,
            attachments: Vec::new(),
            member: None,
            mentioned_roles: Vec::new(),
            reference: None,
        }
    }

    pub fn author_id(&self) -> Option<u64> {
        self.author.as_ref().map(|a| a.id)
    }

    /// Message text, empty when unknown.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Whether this is the opening message of the thread it lives in.
    ///
    /// Discord gives a thread the same id as its starter message.
    pub fn is_thread_starter(&self) -> bool {
        self.id == self.channel_id
    }
}

/// Immutable view of a reaction event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionSnapshot {
    pub channel_id: u64,
    pub message_id: u64,
    pub guild_id: Option<u64>,
    pub user_id: Option<u64>,
    /// Whether the reacting user is a bot, when known.
    pub user_is_bot: Option<bool>,
    pub member: Option<MemberInfo>,
    /// Unicode emoji, or the custom emoji name.
    pub emoji: String,
}

/// Thread channel metadata fetched from the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub owner_id: Option<u64>,
    pub archived: bool,
    pub locked: bool,
    /// Pinned to the top of its forum.
    pub pinned: bool,
    pub applied_tags: Vec<u64>,
    pub last_message_id: Option<u64>,
}

impl ThreadInfo {
    pub fn has_tag(&self, tag_id: u64) -> bool {
        self.applied_tags.contains(&tag_id)
    }

    /// When the thread last saw a message, falling back to its creation time.
    pub fn last_activity_ms(&self) -> i64 {
        snowflake_timestamp_ms(self.last_message_id.unwrap_or(self.id))
    }
}

/// Discord epoch (2015-01-01T00:00:00Z) in Unix milliseconds.
pub const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Creation time encoded in a Discord snowflake, in Unix milliseconds.
pub fn snowflake_timestamp_ms(id: u64) -> i64 {
    (id >> 22) as i64 + DISCORD_EPOCH_MS
}

/// Requested change to a thread. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadEdit {
    pub archived: Option<bool>,
    pub locked: Option<bool>,
    pub applied_tags: Option<Vec<u64>>,
}

/// External account providers supported by `/verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Crowdin,
    Modrinth,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Crowdin, ProviderKind::Modrinth];

    /// Lowercase tag used in URLs, the database and command options.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crowdin => "crowdin",
            Self::Modrinth => "modrinth",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Crowdin => "Crowdin",
            Self::Modrinth => "Modrinth",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crowdin" => Ok(Self::Crowdin),
            "modrinth" => Ok(Self::Modrinth),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Persisted activity record for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: u64,
    pub messages_sent: i64,
    pub crowdin_user_id: Option<String>,
    pub modrinth_user_id: Option<String>,
}
