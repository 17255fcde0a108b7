//! Deletes messages carrying executable attachments and alerts the channel.

use serenity::async_trait;

use crate::error::Result;
use crate::models::{Attachment, MessageSnapshot};
use crate::pipeline::{Listener, ListenerSpec, MessageContext};
use crate::text::{channel_mention, file_extension, human_file_size, user_mention};

/// Extensions that are never allowed as attachments.
pub const BLOCKLISTED_EXTENSIONS: &[&str] = &[
    "exe", "msi", "scr", "bat", "cmd", "com", "pif", "vbs", "vbe", "wsf", "ps1", "hta", "cpl",
    "lnk", "reg", "dll", "sys", "apk", "dmg", "pkg",
];

pub fn is_blocklisted(filename: &str) -> bool {
    file_extension(filename).is_some_and(|ext| BLOCKLISTED_EXTENSIONS.contains(&ext.as_str()))
}

fn blocklisted_attachments(message: &MessageSnapshot) -> impl Iterator<Item = &Attachment> {
    message
        .attachments
        .iter()
        .filter(|a| !a.filename.is_empty() && is_blocklisted(&a.filename))
}

/// Alert posted for one offending attachment.
pub fn alert_text(message: &MessageSnapshot, attachment: &Attachment) -> String {
    let (author_id, author_name) = message
        .author
        .as_ref()
        .map(|a| (a.id, a.name.as_str()))
        .unwrap_or((0, "unknown"));

    [
        format!(
            "⚠️ User {} (`{}`, ID: {}) attempted to send a blocklisted file type in {}.",
            user_mention(author_id),
            author_name,
            author_id,
            channel_mention(message.channel_id)
        ),
        format!("> Filename: `{}`", attachment.filename),
        format!("> Size: {}", human_file_size(attachment.size)),
    ]
    .join("\n")
}

pub struct ScanForBlocklistedFiles {
    spec: ListenerSpec,
}

impl ScanForBlocklistedFiles {
    pub fn new() -> Self {
        Self {
            spec: ListenerSpec::new("global:scan-for-blocklisted-files")
                .description("Scans message attachments for blocklisted file extensions"),
        }
    }
}

impl Default for ScanForBlocklistedFiles {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener<MessageContext> for ScanForBlocklistedFiles {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    async fn matches(&self, ctx: &MessageContext) -> Result<bool> {
        Ok(ctx.message.author.is_some() && blocklisted_attachments(&ctx.message).next().is_some())
    }

    async fn handle(&self, ctx: &MessageContext) -> Result<()> {
        let message = &ctx.message;
        let platform = &ctx.services.platform;

        // Delete once, however many attachments matched; still alert if it fails.
        let deleted = platform
            .delete_message(message.channel_id, message.id, "Blocklisted file type")
            .await;

        for attachment in blocklisted_attachments(message) {
            tracing::info!(
                user_id = ?message.author_id(),
                channel_id = message.channel_id,
                filename = %attachment.filename,
                "Blocklisted attachment removed"
            );
            platform
                .send_message(message.channel_id, &alert_text(message, attachment))
                .await?;
        }

        deleted
    }
}
