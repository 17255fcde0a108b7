//! Configuration loading from environment.
//!
//! Every setting comes from an environment variable; `.env` files are loaded by
//! `main` through dotenvy before this runs.

use std::env;
use std::net::IpAddr;

use crate::error::{BotError, Result};
use crate::models::ProviderKind;

/// Default number of messages that earns the active role.
pub const DEFAULT_ACTIVITY_THRESHOLD: i64 = 20;

/// Default weighted download count that earns the verified creator role.
pub const DEFAULT_CREATOR_DOWNLOADS_THRESHOLD: f64 = 20_000.0;

/// Default per-command cooldown when a command declares none.
pub const DEFAULT_COMMAND_COOLDOWN_SECS: u64 = 3;

/// OAuth client credentials for one provider.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Space separated scopes requested at authorization time.
    pub scopes: String,
}

/// Crowdin-specific settings on top of the OAuth client.
#[derive(Debug, Clone)]
pub struct CrowdinConfig {
    pub oauth: OAuthClientConfig,
    /// Project whose top-members report decides translator status.
    pub project_id: Option<u64>,
    /// Personal access token used for report generation.
    pub api_token: Option<String>,
}

/// Main configuration for the bot.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Discord bot token.
    pub discord_token: String,
    /// Home guild; listeners that only make sense there are scoped to it.
    pub guild_id: Option<u64>,
    /// Forum channel hosting community support threads.
    pub support_forum_id: Option<u64>,
    /// Forum tag applied to solved support threads.
    pub solved_tag_id: Option<u64>,
    /// Moderator role (gates moderator commands, pinged by users).
    pub moderator_role_id: Option<u64>,
    /// Channel receiving the moderator audit log.
    pub log_channel_id: Option<u64>,
    /// Role granted after `activity_threshold` messages.
    pub active_role_id: Option<u64>,
    /// Role granted for Crowdin contributions.
    pub translator_role_id: Option<u64>,
    /// Role granted for Modrinth creators over the download threshold.
    pub verified_creator_role_id: Option<u64>,
    pub activity_threshold: i64,
    pub creator_downloads_threshold: f64,
    pub default_command_cooldown_secs: u64,
    /// Port for the verification and health web server.
    pub port: u16,
    /// Externally reachable base URL, used to build verification links.
    pub public_base_url: String,
    /// Source addresses allowed to query `/healthz`. Empty means open.
    pub healthz_allowed_ips: Vec<IpAddr>,
    pub database_path: String,
    pub crowdin: Option<CrowdinConfig>,
    pub modrinth: Option<OAuthClientConfig>,
}

impl BotConfig {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `DISCORD_BOT_TOKEN`: Discord bot token
    ///
    /// Optional environment variables:
    /// - `GUILD_ID`, `COMMUNITY_SUPPORT_FORUM_ID`, `COMMUNITY_SUPPORT_FORUM_SOLVED_TAG_ID`
    /// - `DISCORD_MODERATOR_ROLE_ID`, `LOG_CHANNEL_ID`, `ACTIVE_ROLE_ID`, `TRANSLATOR_ROLE_ID`, `VERIFIED_CREATOR_ROLE_ID`
    /// - `ACTIVITY_THRESHOLD` (default: 20)
    /// - `CREATOR_DOWNLOADS_THRESHOLD` (default: 20000)
    /// - `DEFAULT_COMMAND_COOLDOWN_SECS` (default: 3)
    /// - `PORT` (default: 3000), `PUBLIC_BASE_URL`, `HEALTHZ_ALLOWED_IPS`, `DATABASE_PATH`
    /// - `CROWDIN_CLIENT_ID`, `CROWDIN_CLIENT_SECRET`, `CROWDIN_SCOPES`, `CROWDIN_PROJECT_ID`, `CROWDIN_TOKEN`
    /// - `MODRINTH_CLIENT_ID`, `MODRINTH_CLIENT_SECRET`, `MODRINTH_SCOPES`
    pub fn from_env() -> Result<Self> {
        let discord_token = env::var("DISCORD_BOT_TOKEN")
            .map_err(|_| BotError::Config("DISCORD_BOT_TOKEN not set".to_string()))?;

        let active_role_id = optional_parsed("ACTIVE_ROLE_ID")?;
        let translator_role_id = optional_parsed("TRANSLATOR_ROLE_ID")?.or(active_role_id);

        let healthz_allowed_ips = match non_empty("HEALTHZ_ALLOWED_IPS") {
            Some(raw) => parse_ip_list(&raw)?,
            None => Vec::new(),
        };

        let crowdin = oauth_client("CROWDIN", "project").map(|oauth| -> Result<CrowdinConfig> {
            Ok(CrowdinConfig {
                oauth,
                project_id: optional_parsed("CROWDIN_PROJECT_ID")?,
                api_token: non_empty("CROWDIN_TOKEN"),
            })
        });
        let crowdin = crowdin.transpose()?;

        Ok(Self {
            discord_token,
            guild_id: optional_parsed("GUILD_ID")?,
            support_forum_id: optional_parsed("COMMUNITY_SUPPORT_FORUM_ID")?,
            solved_tag_id: optional_parsed("COMMUNITY_SUPPORT_FORUM_SOLVED_TAG_ID")?,
            moderator_role_id: optional_parsed("DISCORD_MODERATOR_ROLE_ID")?,
            log_channel_id: optional_parsed("LOG_CHANNEL_ID")?,
            active_role_id,
            translator_role_id,
            verified_creator_role_id: optional_parsed("VERIFIED_CREATOR_ROLE_ID")?,
            activity_threshold: optional_parsed("ACTIVITY_THRESHOLD")?
                .unwrap_or(DEFAULT_ACTIVITY_THRESHOLD),
            creator_downloads_threshold: optional_parsed("CREATOR_DOWNLOADS_THRESHOLD")?
                .unwrap_or(DEFAULT_CREATOR_DOWNLOADS_THRESHOLD),
            default_command_cooldown_secs: optional_parsed("DEFAULT_COMMAND_COOLDOWN_SECS")?
                .unwrap_or(DEFAULT_COMMAND_COOLDOWN_SECS),
            port: optional_parsed("PORT")?.unwrap_or(3000),
            public_base_url: non_empty("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            healthz_allowed_ips,
            database_path: non_empty("DATABASE_PATH").unwrap_or_else(|| "steward.db".to_string()),
            crowdin,
            modrinth: oauth_client("MODRINTH", ""),
        })
    }

    /// Configuration with every optional feature disabled.
    pub fn minimal(discord_token: impl Into<String>) -> Self {
        Self {
            discord_token: discord_token.into(),
            guild_id: None,
            support_forum_id: None,
            solved_tag_id: None,
            moderator_role_id: None,
            log_channel_id: None,
            active_role_id: None,
            translator_role_id: None,
            verified_creator_role_id: None,
            activity_threshold: DEFAULT_ACTIVITY_THRESHOLD,
            creator_downloads_threshold: DEFAULT_CREATOR_DOWNLOADS_THRESHOLD,
            default_command_cooldown_secs: DEFAULT_COMMAND_COOLDOWN_SECS,
            port: 3000,
            public_base_url: "http://localhost:3000".to_string(),
            healthz_allowed_ips: Vec::new(),
            database_path: "steward.db".to_string(),
            crowdin: None,
            modrinth: None,
        }
    }

    /// Whether the provider's OAuth client is configured.
    pub fn provider_enabled(&self, provider: ProviderKind) -> bool {
        match provider {
            ProviderKind::Crowdin => self.crowdin.is_some(),
            ProviderKind::Modrinth => self.modrinth.is_some(),
        }
    }

    /// Role granted when a provider account qualifies.
    pub fn provider_role(&self, provider: ProviderKind) -> Option<u64> {
        match provider {
            ProviderKind::Crowdin => self.translator_role_id,
            ProviderKind::Modrinth => self.verified_creator_role_id,
        }
    }

    /// Callback URL registered with a provider's OAuth application.
    pub fn callback_url(&self, provider: &str) -> String {
        format!("{}/callback/{}", self.public_base_url, provider)
    }
}

/// Read a variable, treating blank values as unset.
fn non_empty(var_name: &str) -> Option<String> {
    env::var(var_name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read and parse an optional variable; a present but malformed value is an error.
fn optional_parsed<T: std::str::FromStr>(var_name: &str) -> Result<Option<T>> {
    match non_empty(var_name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| BotError::Config(format!("{} has an invalid value: {}", var_name, raw))),
        None => Ok(None),
    }
}

/// A provider is enabled only when both its client id and secret are set.
fn oauth_client(prefix: &str, default_scopes: &str) -> Option<OAuthClientConfig> {
    let client_id = non_empty(&format!("{}_CLIENT_ID", prefix))?;
    let client_secret = non_empty(&format!("{}_CLIENT_SECRET", prefix))?;
    let scopes =
        non_empty(&format!("{}_SCOPES", prefix)).unwrap_or_else(|| default_scopes.to_string());

    Some(OAuthClientConfig {
        client_id,
        client_secret,
        scopes,
    })
}

/// Parse a comma-separated list of IP addresses.
fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpAddr>()
                .map_err(|_| BotError::Config(format!("invalid address in HEALTHZ_ALLOWED_IPS: {}", s)))
        })
        .collect()
}
