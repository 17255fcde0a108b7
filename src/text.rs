//! User-facing texts and small formatting helpers.

/// Posted once in every new community support thread.
pub const GREET_TEXT: &str = "**👋 Hello! Thank you for creating a new thread on the Modrinth server**\n\n\
📃 Something went wrong with the game? Make sure to provide logs using <https://mclo.gs>\n\
❔ If you're having an issue with a Modrinth product, use our dedicated support portal <https://support.modrinth.com> instead\n\n\
🔔 Don't forget to mark your thread as solved with `/solved` once your issue has been resolved";

/// Posted when a new support thread looks like a product support request.
pub const PRODUCT_SUPPORT_TEXT: &str = "❔ **Are you having an issue with a Modrinth product?**\n\n\
Community members are not allowed to provide support for our products. \
Use our dedicated support portal <https://support.modrinth.com> for help with our products.\n\n\
Mark this thread with `/solved` if that's correct.";

/// Reminder sent when the thread owner says their problem is gone.
pub const SOLVED_REMINDER_TEXT: &str = "🎉 Glad it works now! If your issue has been resolved, \
please mark this thread as solved by using `/solved`.";

/// Posted before a thread is locked because its starter message was deleted.
pub const STARTER_DELETED_TEXT: &str = "🔒 **Thread archived and locked**\n\
The author of this thread deleted their original message. This thread has been archived and locked.";

/// Reply to raw log uploads.
pub const RAW_LOGS_TEXT: &str = "📃 Please don't upload raw log files. Upload them to <https://mclo.gs> \
and share the link instead, so everyone can read them without downloading anything.";

/// Reply to messages that pinged the moderator role.
pub const MOD_PING_TEXT: &str = "⚠️ Please avoid pinging the moderator role. \
If you need to report something, right click the message and use **Apps → Report** or contact a moderator privately.";

/// Marker that identifies an existing moderator ping reminder.
pub const MOD_PING_MARKER: &str = "avoid pinging the moderator role";

/// Reply to `/solved` before the thread is archived.
pub const MARKED_SOLVED_TEXT: &str = "✅ **Thread marked as solved**\n\
This thread has been marked as solved by its author and will now be archived. \
If the issue comes back, feel free to open a new thread.";

/// Posted before an idle support thread is archived as solved.
pub const INACTIVE_ARCHIVED_TEXT: &str = "✅ **Thread archived**\n\
This thread was resolved automatically after inactivity.";

/// Marker that identifies an existing inactivity warning.
pub const INACTIVE_WARNING_MARKER: &str = "automatically archived";

/// Warning posted in a support thread idle since `last_activity_ms`.
pub fn inactive_warning(last_activity_ms: i64) -> String {
    format!(
        "-# ⚠️ This thread has been inactive since <t:{}:R>. It will be automatically archived soon.",
        last_activity_ms.div_euclid(1000)
    )
}

/// Generic reply when a command fails.
pub const COMMAND_FAILED_TEXT: &str = "There was an error while executing this command.";

/// Render a byte count with binary units, e.g. `1.5 KB`.
pub fn human_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

pub fn user_mention(user_id: u64) -> String {
    format!("<@{}>", user_id)
}

pub fn channel_mention(channel_id: u64) -> String {
    format!("<#{}>", channel_id)
}

/// Extension after the last dot, lowercased. Dotfiles and names without a dot have none.
pub fn file_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Cut `text` to at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}
