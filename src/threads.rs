//! Community support thread helpers shared by listeners and commands.

use std::time::Duration;

use crate::config::BotConfig;
use crate::discord::Platform;
use crate::error::Result;
use crate::models::{MessageSnapshot, ThreadEdit, ThreadInfo};
use crate::text::{inactive_warning, INACTIVE_ARCHIVED_TEXT, INACTIVE_WARNING_MARKER};

/// Idle time after which a support thread is warned.
pub const INACTIVE_WARN_AFTER: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Idle time after which a support thread is archived as solved.
pub const INACTIVE_ARCHIVE_AFTER: Duration = Duration::from_secs(4 * 24 * 60 * 60);

/// How many recent messages are searched for an earlier warning.
const WARNING_SCAN_LIMIT: u8 = 10;

/// The support thread a message lives in, if any.
pub async fn support_thread(
    platform: &dyn Platform,
    config: &BotConfig,
    message: &MessageSnapshot,
) -> Result<Option<ThreadInfo>> {
    let Some(forum_id) = config.support_forum_id else {
        return Ok(None);
    };
    if message.guild_id.is_none() {
        return Ok(None);
    }

    let thread = platform.thread_info(message.channel_id).await?;
    Ok(thread.filter(|t| t.parent_id == Some(forum_id)))
}

/// Whether `user_id` opened the thread.
///
/// Falls back to the starter message author when the owner is not reported.
pub async fn is_thread_owner(
    platform: &dyn Platform,
    thread: &ThreadInfo,
    user_id: u64,
) -> Result<bool> {
    if let Some(owner_id) = thread.owner_id {
        return Ok(owner_id == user_id);
    }
    let starter = platform.fetch_message(thread.id, thread.id).await?;
    Ok(starter.and_then(|m| m.author_id()) == Some(user_id))
}

/// Whether the solved tag is applied to the thread.
pub fn is_solved(config: &BotConfig, thread: &ThreadInfo) -> bool {
    config
        .solved_tag_id
        .is_some_and(|tag| thread.has_tag(tag))
}

/// Join a thread so its events are delivered; failures are only logged.
pub async fn try_join(platform: &dyn Platform, thread_id: u64) {
    if let Err(e) = platform.join_thread(thread_id).await {
        tracing::debug!(error = %e, thread_id = thread_id, "Could not join thread");
    }
}

/// Join every active thread of the support forum. Returns how many were joined.
pub async fn join_support_threads(platform: &dyn Platform, config: &BotConfig) -> Result<usize> {
    let (Some(guild_id), Some(forum_id)) = (config.guild_id, config.support_forum_id) else {
        return Ok(0);
    };

    let threads = platform.active_threads(guild_id).await?;
    let mut joined = 0;
    for thread in threads.iter().filter(|t| t.parent_id == Some(forum_id)) {
        try_join(platform, thread.id).await;
        joined += 1;
    }
    Ok(joined)
}

/// Archive the thread, adding the solved tag when it lives in the support forum.
pub fn solved_edit(config: &BotConfig, thread: &ThreadInfo) -> ThreadEdit {
    let in_support_forum = config.support_forum_id.is_some() && thread.parent_id == config.support_forum_id;

    let applied_tags = match config.solved_tag_id {
        Some(tag) if in_support_forum && !thread.has_tag(tag) => {
            let mut tags = thread.applied_tags.clone();
            tags.push(tag);
            Some(tags)
        }
        _ => None,
    };

    ThreadEdit {
        archived: Some(true),
        locked: None,
        applied_tags,
    }
}

/// What one inactivity sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub warned: usize,
    pub archived: usize,
    pub failed: usize,
}

/// Warn idle support threads and archive the ones idle for too long.
///
/// Pinned threads are left alone. A thread is warned at most once; the warning is
/// found again by scanning the latest bot messages.
pub async fn sweep_inactive(
    platform: &dyn Platform,
    config: &BotConfig,
    now_ms: i64,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let (Some(guild_id), Some(forum_id)) = (config.guild_id, config.support_forum_id) else {
        return Ok(report);
    };

    let threads = platform.active_threads(guild_id).await?;
    for thread in threads
        .iter()
        .filter(|t| t.parent_id == Some(forum_id) && !t.archived && !t.pinned)
    {
        report.checked += 1;
        let last_activity = thread.last_activity_ms();
        let idle_ms = now_ms - last_activity;

        let result = if idle_ms > INACTIVE_ARCHIVE_AFTER.as_millis() as i64 {
            archive_inactive(platform, config, thread).await.map(|()| {
                report.archived += 1;
            })
        } else if idle_ms > INACTIVE_WARN_AFTER.as_millis() as i64 {
            warn_inactive(platform, thread, last_activity).await.map(|warned| {
                if warned {
                    report.warned += 1;
                }
            })
        } else {
            Ok(())
        };

        if let Err(e) = result {
            report.failed += 1;
            tracing::warn!(error = %e, thread_id = thread.id, "Inactive thread check failed");
        }
    }
    Ok(report)
}

async fn archive_inactive(platform: &dyn Platform, config: &BotConfig, thread: &ThreadInfo) -> Result<()> {
    platform.send_message(thread.id, INACTIVE_ARCHIVED_TEXT).await?;
    platform
        .edit_thread(thread.id, &solved_edit(config, thread), "Inactive support thread")
        .await?;
    tracing::info!(thread_id = thread.id, "Archived inactive support thread");
    Ok(())
}

/// Returns whether a new warning was posted.
async fn warn_inactive(platform: &dyn Platform, thread: &ThreadInfo, last_activity_ms: i64) -> Result<bool> {
    let recent = platform.recent_messages(thread.id, WARNING_SCAN_LIMIT).await?;
    let already_warned = recent.iter().any(|m| {
        m.author.as_ref().is_some_and(|a| a.bot) && m.text().contains(INACTIVE_WARNING_MARKER)
    });
    if already_warned {
        return Ok(false);
    }

    platform
        .send_message(thread.id, &inactive_warning(last_activity_ms))
        .await?;
    tracing::debug!(thread_id = thread.id, "Warned inactive support thread");
    Ok(true)
}
