//! Moderator audit log.
//!
//! Moderator actions and unexpected errors are posted as plain lines to the channel
//! named by `LOG_CHANNEL_ID`. Posting is best-effort: with no channel configured
//! nothing is sent, and a failed post is only logged.

use crate::error::BotError;
use crate::pipeline::Services;
use crate::text::user_mention;

/// An entry for the audit channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEntry<'a> {
    /// A moderator reset a user's activity.
    Reset {
        user_id: u64,
        moderator_id: u64,
        moderator_name: &'a str,
    },
    /// A moderator sent a user a private message.
    PrivateMessage {
        user_id: u64,
        moderator_id: u64,
        moderator_name: &'a str,
        reason: &'a str,
    },
    /// An operation failed with an error nobody handled.
    UnknownError { operation: &'a str, error: String },
}

impl AuditEntry<'_> {
    pub fn render(&self) -> String {
        match self {
            Self::Reset {
                user_id,
                moderator_id,
                moderator_name,
            } => format!(
                ":pencil: User {} (ID: {}) has been reset by moderator (`{}`, ID: {}).",
                user_mention(*user_id),
                user_id,
                moderator_name,
                moderator_id
            ),
            Self::PrivateMessage {
                user_id,
                moderator_id,
                moderator_name,
                reason,
            } => format!(
                ":incoming_envelope: Moderator (`{}`, ID: {}) has sent a private message to a user {} (ID: {}), with a reason: {}.",
                moderator_name,
                moderator_id,
                user_mention(*user_id),
                user_id,
                reason
            ),
            Self::UnknownError { operation, error } => {
                format!("**Unknown Error:** `{}` {}", operation, error)
            }
        }
    }
}

/// Post an entry to the audit channel. Returns whether it was delivered.
pub async fn record(services: &Services, entry: &AuditEntry<'_>) -> bool {
    let Some(channel_id) = services.config.log_channel_id else {
        return false;
    };
    match services.platform.send_message(channel_id, &entry.render()).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, channel_id = channel_id, "Failed to post audit log entry");
            false
        }
    }
}

/// Report an error to the audit channel when it is critical.
pub async fn record_error(services: &Services, operation: &str, error: &BotError) -> bool {
    if !error.is_critical() {
        return false;
    }
    record(
        services,
        &AuditEntry::UnknownError {
            operation,
            error: error.to_string(),
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::BotConfig;
    use crate::testing::{services_with, MockPlatform};

    const LOG_CHANNEL: u64 = 555;

    async fn setup(log_channel: Option<u64>) -> (Arc<MockPlatform>, Services) {
        let mut config = BotConfig::minimal("token");
        config.log_channel_id = log_channel;
        let platform = Arc::new(MockPlatform::new());
        let services = services_with(platform.clone(), config).await;
        (platform, services)
    }

    #[test]
    fn entries_render_mentions_and_ids() {
        let reset = AuditEntry::Reset {
            user_id: 42,
            moderator_id: 3,
            moderator_name: "moddy",
        };
        assert_eq!(
            reset.render(),
            ":pencil: User <@42> (ID: 42) has been reset by moderator (`moddy`, ID: 3)."
        );

        let pm = AuditEntry::PrivateMessage {
            user_id: 42,
            moderator_id: 3,
            moderator_name: "moddy",
            reason: "spam",
        };
        assert!(pm.render().ends_with("to a user <@42> (ID: 42), with a reason: spam."));
    }

    #[tokio::test]
    async fn entries_go_to_the_log_channel() {
        let (platform, services) = setup(Some(LOG_CHANNEL)).await;
        let entry = AuditEntry::Reset {
            user_id: 42,
            moderator_id: 3,
            moderator_name: "moddy",
        };

        assert!(record(&services, &entry).await);
        assert_eq!(platform.sent_to(LOG_CHANNEL), vec![entry.render()]);
    }

    #[tokio::test]
    async fn nothing_is_sent_without_a_channel() {
        let (platform, services) = setup(None).await;
        let entry = AuditEntry::UnknownError {
            operation: "command:ping",
            error: "boom".to_string(),
        };

        assert!(!record(&services, &entry).await);
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn only_critical_errors_are_reported() {
        let (platform, services) = setup(Some(LOG_CHANNEL)).await;

        let quiet = BotError::Provider("timeout".to_string());
        assert!(!record_error(&services, "command:project", &quiet).await);

        let loud = BotError::Database("disk I/O error".to_string());
        assert!(record_error(&services, "command:reset", &loud).await);
        assert_eq!(
            platform.sent_to(LOG_CHANNEL),
            vec!["**Unknown Error:** `command:reset` Database error: disk I/O error".to_string()]
        );
    }
}
