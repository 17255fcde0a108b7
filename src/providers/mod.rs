//! External account providers used by `/verify`.
//!
//! Each provider knows how to build its authorize URL, exchange an authorization
//! code, look up the current identity and assess whether the account earns a role.
//! Outbound requests to one provider share a governor rate limiter.

pub mod crowdin;
pub mod modrinth;

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use serenity::async_trait;

use crate::config::BotConfig;
use crate::error::{BotError, Result};
use crate::models::ProviderKind;
use crate::text::truncate;

/// Direct (unkeyed) limiter shared by every request to one provider.
pub type ProviderLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Requests per second allowed towards a single provider.
const REQUESTS_PER_SECOND: u32 = 5;

pub fn provider_limiter(per_second: u32) -> Arc<ProviderLimiter> {
    let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rate)))
}

/// Tokens returned by an authorization code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenSet {
    /// Absolute expiry in epoch milliseconds.
    pub fn expires_at(&self, now_ms: i64) -> Option<i64> {
        self.expires_in.map(|secs| now_ms + secs * 1000)
    }
}

/// The provider account that completed authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub id: String,
    pub username: Option<String>,
}

/// Whether an account earns the provider's role, with the score that decided it.
///
/// The score is translated plus approved strings for Crowdin and weighted
/// downloads for Modrinth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub qualifies: bool,
    pub score: f64,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Where the browser goes to authorize; `state` is the verification token.
    fn authorize_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<TokenSet>;

    async fn identity(&self, access_token: &str) -> Result<ProviderIdentity>;

    async fn assess(&self, access_token: &str, identity: &ProviderIdentity) -> Result<Assessment>;
}

/// Enabled providers by kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Providers whose client credentials are configured.
    pub fn from_config(config: &BotConfig, http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        if let Some(crowdin) = &config.crowdin {
            registry = registry.with(Arc::new(crowdin::CrowdinProvider::new(
                crowdin,
                config.callback_url(ProviderKind::Crowdin.as_str()),
                http.clone(),
            )));
        }
        if let Some(modrinth) = &config.modrinth {
            registry = registry.with(Arc::new(modrinth::ModrinthProvider::new(
                modrinth,
                config.callback_url(ProviderKind::Modrinth.as_str()),
                config.creator_downloads_threshold,
                modrinth::ModrinthApi::new(http),
            )));
        }
        registry
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn OAuthProvider>> {
        self.providers.get(&kind)
    }

    pub fn is_enabled(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }
}

/// Turn a non-success response into an error carrying the status and a short body excerpt.
pub(crate) async fn check_status(
    response: reqwest::Response,
    what: &str,
    into_error: fn(String) -> BotError,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1000);
        return Err(BotError::RateLimited { retry_after_ms });
    }
    let body = response.text().await.unwrap_or_default();
    Err(into_error(format!("{} failed ({}): {}", what, status, truncate(&body, 200))))
}
