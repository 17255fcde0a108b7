//! Asks users to share game logs through a paste service instead of raw uploads.

use regex::Regex;
use serenity::async_trait;

use crate::error::Result;
use crate::pipeline::{Listener, ListenerSpec, MessageContext};
use crate::text::RAW_LOGS_TEXT;

const LOG_FILENAMES: &[&str] = &["message.txt", "latest.log", "debug.log", "launcher_log.txt"];

pub struct ScanForRawLogs {
    spec: ListenerSpec,
    crash_report: Regex,
}

impl ScanForRawLogs {
    pub fn new() -> Result<Self> {
        Ok(Self {
            spec: ListenerSpec::new("global:scan-for-raw-logs")
                .description("Scans message attachments for raw logs"),
            crash_report: Regex::new(
                r"^crash-\d{4}-\d{2}-\d{2}_\d{2}\.\d{2}\.\d{2}-(client|server)\.txt$",
            )?,
        })
    }

    /// Whether a filename looks like a game log or crash report.
    pub fn is_log_file(&self, filename: &str) -> bool {
        let normalized = filename.to_lowercase();
        LOG_FILENAMES.contains(&normalized.as_str()) || self.crash_report.is_match(&normalized)
    }
}

#[async_trait]
impl Listener<MessageContext> for ScanForRawLogs {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    async fn matches(&self, ctx: &MessageContext) -> Result<bool> {
        Ok(ctx
            .message
            .attachments
            .iter()
            .any(|a| self.is_log_file(&a.filename)))
    }

    async fn handle(&self, ctx: &MessageContext) -> Result<()> {
        ctx.services
            .platform
            .reply_to_message(ctx.message.channel_id, ctx.message.id, RAW_LOGS_TEXT)
            .await?;
        Ok(())
    }
}
