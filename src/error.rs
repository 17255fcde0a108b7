//! Error types for the bot.
//!
//! All errors are explicitly typed using thiserror. Listener, command and web handlers
//! return these, and the pipeline, dispatcher and HTTP layer are where they stop.

use thiserror::Error;

/// Central error type for all bot operations.
#[derive(Debug, Error)]
pub enum BotError {
    /// Discord API error from serenity.
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// Rate limited by an external API.
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds to wait before retry.
        retry_after_ms: u64,
    },

    /// Configuration error (missing env vars, invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal state error (invalid state transitions, missing collaborators).
    #[error("Internal state error: {0}")]
    InternalState(String),

    /// Regex pattern compilation error.
    #[error("Regex pattern error: {0}")]
    RegexPattern(#[from] regex::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// OAuth error (code exchange, identity lookup).
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// External provider API error (reports, project lookups).
    #[error("Provider error: {0}")]
    Provider(String),

    /// A listener or command handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl From<serenity::Error> for BotError {
    fn from(err: serenity::Error) -> Self {
        Self::DiscordApi(Box::new(err))
    }
}

impl BotError {
    /// Log error with full context using tracing.
    pub fn log_with_context(&self, context: &ErrorContext) {
        match self {
            Self::Database(_) | Self::InternalState(_) | Self::Panicked(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "Critical error occurred"
                );
            }
            Self::RateLimited { retry_after_ms } => {
                tracing::warn!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    retry_after_ms = retry_after_ms,
                    "Rate limited"
                );
            }
            Self::DiscordApi(_) | Self::Http(_) | Self::OAuth(_) | Self::Provider(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "External API error"
                );
            }
            Self::Config(_) | Self::RegexPattern(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Configuration error"
                );
            }
            Self::Json(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "Data processing error"
                );
            }
        }
    }

    /// Critical errors are also posted to the moderator audit channel.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::InternalState(_) | Self::Panicked(_)
        )
    }
}

/// Context information for error logging.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Unique request identifier for correlation
    pub request_id: String,
    /// User ID if available
    pub user_id: Option<u64>,
    /// Guild ID if available
    pub guild_id: Option<u64>,
    /// Operation being performed
    pub operation: String,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            guild_id: None,
            operation: operation.into(),
        }
    }

    /// Set user ID
    pub fn with_user_id(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set guild ID
    pub fn with_guild_id(mut self, guild_id: u64) -> Self {
        self.guild_id = Some(guild_id);
        self
    }
}

/// Result type alias for bot operations.
pub type Result<T> = std::result::Result<T, BotError>;
