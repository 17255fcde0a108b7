//! Account verification through provider OAuth.
//!
//! A verification moves through three steps:
//! 1. `/verify` issues a random token stored with a 15 minute expiry.
//! 2. `/{provider}/verify?token=` checks the token and redirects to the provider.
//! 3. `/callback/{provider}?code=&state=` claims the token, links the account,
//!    grants the role when the account qualifies and deletes the token.
//!
//! The claim is a conditional update on the token row, so only one callback per
//! token runs at a time. It lapses after a minute, which lets a user retry after
//! a failed attempt without a new token.

use std::time::Duration;

use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::BotConfig;
use crate::database::{ClaimOutcome, Database, LinkedAccount, VerificationRecord};
use crate::discord::RoleChange;
use crate::error::{BotError, ErrorContext, Result};
use crate::models::ProviderKind;
use crate::pipeline::Services;
use crate::providers::{Assessment, ProviderRegistry};

pub const TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
pub const CLAIM_WINDOW: Duration = Duration::from_secs(60);
const TOKEN_BYTES: usize = 20;

/// Random hex token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Short SHA-256 fingerprint, safe to log in place of the token.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// A freshly issued verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedVerification {
    pub token: String,
    pub expires_at: i64,
    /// Link the user opens to start the flow.
    pub link: String,
}

/// Store a new verification token for `discord_user_id`.
pub async fn issue(
    db: &Database,
    config: &BotConfig,
    provider: ProviderKind,
    discord_user_id: u64,
    now_ms: i64,
    redirect_to: Option<String>,
) -> Result<IssuedVerification> {
    let token = generate_token();
    let expires_at = now_ms + TOKEN_TTL.as_millis() as i64;

    db.create_verification(&VerificationRecord {
        token: token.clone(),
        provider,
        discord_user_id,
        expires_at,
        redirect_to,
    })
    .await?;

    tracing::debug!(
        provider = %provider,
        user_id = discord_user_id,
        token = %fingerprint(&token),
        expires_at = expires_at,
        "Verification issued"
    );

    let link = format!(
        "{}/{}/verify?token={}",
        config.public_base_url,
        provider.as_str(),
        token
    );
    Ok(IssuedVerification {
        token,
        expires_at,
        link,
    })
}

/// Why a verification request was refused. The display text is shown to the browser.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Missing token")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Missing code/state")]
    MissingCodeOrState,
    #[error("Invalid or expired state")]
    InvalidState,
    #[error("Request already in progress")]
    InProgress,
    #[error("Unknown provider")]
    UnknownProvider,
    #[error("Verification failed. Please try again later.")]
    Failed(#[source] BotError),
}

impl From<BotError> for VerificationError {
    fn from(err: BotError) -> Self {
        Self::Failed(err)
    }
}

/// Successful callback result.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub discord_user_id: u64,
    pub assessment: Assessment,
    pub role: Option<RoleChange>,
    /// Where to send the browser instead of the close page.
    pub redirect_to: Option<String>,
}

/// Direct message summarizing a verification.
pub fn result_message(provider: ProviderKind, assessment: &Assessment) -> String {
    match (provider, assessment.qualifies) {
        (ProviderKind::Crowdin, true) => {
            "Your Crowdin account is linked and you have contributions. The role has been granted."
                .to_string()
        }
        (ProviderKind::Crowdin, false) => {
            "Your Crowdin account is linked, but we did not detect contributions yet. \
             Contribute and run /verify crowdin again."
                .to_string()
        }
        (ProviderKind::Modrinth, true) => {
            "Your Modrinth account is linked and you qualify for the creator role. The role has been granted."
                .to_string()
        }
        (ProviderKind::Modrinth, false) => format!(
            "Your Modrinth account is linked, but you do not meet the current threshold yet. \
             Weighted downloads: {}.",
            assessment.score.floor() as u64
        ),
    }
}

/// Runs the redirect and callback steps.
pub struct Verifier {
    services: Services,
    providers: ProviderRegistry,
}

impl Verifier {
    pub fn new(services: Services, providers: ProviderRegistry) -> Self {
        Self {
            services,
            providers,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Provider authorize URL for a live token of the same provider.
    pub async fn authorize_redirect(
        &self,
        provider: ProviderKind,
        token: Option<&str>,
        now_ms: i64,
    ) -> std::result::Result<String, VerificationError> {
        let oauth = self
            .providers
            .get(provider)
            .ok_or(VerificationError::UnknownProvider)?;
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(VerificationError::MissingToken)?;

        let record = self
            .services
            .db
            .find_verification(token, now_ms)
            .await?
            .filter(|r| r.provider == provider)
            .ok_or(VerificationError::InvalidToken)?;

        tracing::debug!(provider = %provider, user_id = record.discord_user_id, token = %fingerprint(token), "Redirecting to provider");
        Ok(oauth.authorize_url(token))
    }

    /// Handle a provider callback. `state` carries the verification token.
    pub async fn complete(
        &self,
        provider: ProviderKind,
        code: Option<&str>,
        state: Option<&str>,
        now_ms: i64,
    ) -> std::result::Result<Completed, VerificationError> {
        let oauth = self
            .providers
            .get(provider)
            .ok_or(VerificationError::UnknownProvider)?;
        let (Some(code), Some(state)) = (
            code.filter(|c| !c.is_empty()),
            state.filter(|s| !s.is_empty()),
        ) else {
            return Err(VerificationError::MissingCodeOrState);
        };

        let record = match self
            .services
            .db
            .claim_verification(state, provider, now_ms, CLAIM_WINDOW.as_millis() as i64)
            .await?
        {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::InProgress => {
                tracing::info!(provider = %provider, token = %fingerprint(state), "Duplicate callback rejected");
                return Err(VerificationError::InProgress);
            }
            ClaimOutcome::Invalid => return Err(VerificationError::InvalidState),
        };

        let user_id = record.discord_user_id;
        let result = async {
            let tokens = oauth.exchange_code(code).await?;
            let identity = oauth.identity(&tokens.access_token).await?;

            self.services
                .db
                .upsert_linked_account(&LinkedAccount {
                    discord_user_id: user_id,
                    provider,
                    provider_user_id: identity.id.clone(),
                    access_token: tokens.access_token.clone(),
                    refresh_token: tokens.refresh_token.clone(),
                    expires_at: tokens.expires_at(now_ms),
                    organization_domain: None,
                })
                .await?;
            self.services
                .db
                .link_provider_identity(user_id, provider, &identity.id)
                .await?;

            let assessment = oauth.assess(&tokens.access_token, &identity).await?;
            let role = self.apply_result(provider, user_id, &assessment).await?;
            Ok::<_, BotError>((assessment, role))
        }
        .await;

        let (assessment, role) = match result {
            Ok(done) => done,
            Err(e) => {
                e.log_with_context(
                    &ErrorContext::new(format!("verify:{}", provider)).with_user_id(user_id),
                );
                return Err(VerificationError::Failed(e));
            }
        };

        self.services.db.delete_verification(state).await?;
        tracing::info!(
            provider = %provider,
            user_id = user_id,
            qualifies = assessment.qualifies,
            role = ?role,
            "Verification completed"
        );

        Ok(Completed {
            discord_user_id: user_id,
            assessment,
            role,
            redirect_to: record.redirect_to,
        })
    }

    /// Grant the provider role when earned and tell the user how it went.
    ///
    /// Users who left the home guild get neither a role nor a message.
    async fn apply_result(
        &self,
        provider: ProviderKind,
        user_id: u64,
        assessment: &Assessment,
    ) -> Result<Option<RoleChange>> {
        let platform = &self.services.platform;
        let config = &self.services.config;

        let mut role = None;
        if let Some(guild_id) = config.guild_id {
            if platform.member_roles(guild_id, user_id).await?.is_none() {
                tracing::info!(user_id = user_id, provider = %provider, "Verified user is not a guild member");
                return Ok(Some(RoleChange::NotMember));
            }
            if let (true, Some(role_id)) = (assessment.qualifies, config.provider_role(provider)) {
                let reason = format!("Verified {} account", provider.display_name());
                role = Some(platform.ensure_role(guild_id, user_id, role_id, &reason).await?);
            }
        }

        platform
            .notify_user(user_id, &result_message(provider, assessment))
            .await;
        Ok(role)
    }

    /// Drop expired tokens.
    pub async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        self.services.db.purge_expired_verifications(now_ms).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serenity::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::providers::{OAuthProvider, ProviderIdentity, TokenSet};
    use crate::testing::{services_with, MockPlatform};

    const GUILD: u64 = 1;
    const TRANSLATOR: u64 = 60;
    const USER: u64 = 42;

    /// Provider double; `gate` holds the code exchange until notified.
    struct FakeProvider {
        kind: ProviderKind,
        score: f64,
        exchanges: AtomicUsize,
        started: Notify,
        gate: Option<Notify>,
        fail_exchange: bool,
    }

    impl FakeProvider {
        fn new(kind: ProviderKind, score: f64) -> Self {
            Self {
                kind,
                score,
                exchanges: AtomicUsize::new(0),
                started: Notify::new(),
                gate: None,
                fail_exchange: false,
            }
        }
    }

    #[async_trait]
    impl OAuthProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn authorize_url(&self, state: &str) -> String {
            format!("https://provider.example/authorize?state={}", state)
        }

        async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_exchange {
                return Err(BotError::OAuth("invalid_grant with client_secret=hunter2".to_string()));
            }
            Ok(TokenSet {
                access_token: format!("access-{}", code),
                refresh_token: Some("refresh".to_string()),
                expires_in: Some(3600),
            })
        }

        async fn identity(&self, _access_token: &str) -> Result<ProviderIdentity> {
            Ok(ProviderIdentity {
                id: "1234".to_string(),
                username: Some("translator".to_string()),
            })
        }

        async fn assess(&self, _access_token: &str, _identity: &ProviderIdentity) -> Result<Assessment> {
            Ok(Assessment {
                qualifies: self.score > 0.0,
                score: self.score,
            })
        }
    }

    async fn setup(provider: FakeProvider) -> (Arc<MockPlatform>, Arc<FakeProvider>, Verifier) {
        let mut config = BotConfig::minimal("token");
        config.guild_id = Some(GUILD);
        config.translator_role_id = Some(TRANSLATOR);
        config.public_base_url = "https://bot.example.org".to_string();

        let platform = Arc::new(MockPlatform::new());
        platform.set_member_roles(GUILD, USER, vec![]);
        let services = services_with(platform.clone(), config).await;

        let provider = Arc::new(provider);
        let registry = ProviderRegistry::new().with(provider.clone());
        (platform, provider, Verifier::new(services, registry))
    }

    async fn issue_for(verifier: &Verifier, provider: ProviderKind, now: i64) -> IssuedVerification {
        let services = verifier.services();
        issue(&services.db, &services.config, provider, USER, now, None)
            .await
            .expect("issue")
    }

    #[test]
    fn tokens_are_long_and_random() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert_ne!(a, b);
        assert_eq!(fingerprint(&a).len(), 12);
        assert_ne!(fingerprint(&a), a[..12]);
    }

    #[tokio::test]
    async fn crowdin_without_contributions_links_but_grants_nothing() {
        let (platform, provider, verifier) = setup(FakeProvider::new(ProviderKind::Crowdin, 0.0)).await;

        let issued = issue_for(&verifier, ProviderKind::Crowdin, 0).await;
        assert_eq!(issued.expires_at, 15 * 60 * 1000);
        assert_eq!(
            issued.link,
            format!("https://bot.example.org/crowdin/verify?token={}", issued.token)
        );

        let redirect = verifier
            .authorize_redirect(ProviderKind::Crowdin, Some(&issued.token), 1_000)
            .await
            .expect("redirect");
        assert!(redirect.contains(&format!("state={}", issued.token)));

        let completed = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&issued.token), 2_000)
            .await
            .expect("callback");
        assert!(!completed.assessment.qualifies);
        assert_eq!(completed.role, None);
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);

        let db = &verifier.services().db;
        let account = db
            .linked_account(USER, ProviderKind::Crowdin)
            .await
            .expect("query")
            .expect("linked");
        assert_eq!(account.provider_user_id, "1234");
        assert_eq!(account.expires_at, Some(2_000 + 3_600_000));
        let user = db.user(USER).await.expect("query").expect("row");
        assert_eq!(user.crowdin_user_id.as_deref(), Some("1234"));

        assert_eq!(platform.role_grants(), 0);
        let dms = platform.direct_messages_to(USER);
        assert_eq!(dms.len(), 1);
        assert!(dms[0].contains("did not detect contributions"));
    }

    #[tokio::test]
    async fn qualifying_account_gets_role_once() {
        let (platform, _provider, verifier) = setup(FakeProvider::new(ProviderKind::Crowdin, 12.0)).await;

        let first = issue_for(&verifier, ProviderKind::Crowdin, 0).await;
        let completed = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&first.token), 1)
            .await
            .expect("callback");
        assert_eq!(completed.role, Some(RoleChange::Added));

        let second = issue_for(&verifier, ProviderKind::Crowdin, 10).await;
        let completed = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&second.token), 11)
            .await
            .expect("callback");
        assert_eq!(completed.role, Some(RoleChange::AlreadyPresent));
        assert_eq!(platform.role_grants(), 1);
        assert_eq!(platform.member_roles_now(GUILD, USER), Some(vec![TRANSLATOR]));
    }

    #[tokio::test]
    async fn consumed_token_cannot_be_replayed() {
        let (_platform, provider, verifier) = setup(FakeProvider::new(ProviderKind::Crowdin, 0.0)).await;
        let issued = issue_for(&verifier, ProviderKind::Crowdin, 0).await;

        verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&issued.token), 1)
            .await
            .expect("first callback");
        let replay = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&issued.token), 120_000)
            .await;

        assert!(matches!(replay, Err(VerificationError::InvalidState)));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
        let redirect = verifier
            .authorize_redirect(ProviderKind::Crowdin, Some(&issued.token), 2)
            .await;
        assert!(matches!(redirect, Err(VerificationError::InvalidToken)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (_platform, provider, verifier) = setup(FakeProvider::new(ProviderKind::Crowdin, 0.0)).await;
        let issued = issue_for(&verifier, ProviderKind::Crowdin, 0).await;
        let after_expiry = TOKEN_TTL.as_millis() as i64;

        let redirect = verifier
            .authorize_redirect(ProviderKind::Crowdin, Some(&issued.token), after_expiry)
            .await;
        assert!(matches!(redirect, Err(VerificationError::InvalidToken)));

        let callback = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&issued.token), after_expiry)
            .await;
        assert!(matches!(callback, Err(VerificationError::InvalidState)));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_is_bound_to_its_provider() {
        let (_platform, _provider, verifier) = setup(FakeProvider::new(ProviderKind::Crowdin, 0.0)).await;
        let issued = issue_for(&verifier, ProviderKind::Modrinth, 0).await;

        let redirect = verifier
            .authorize_redirect(ProviderKind::Crowdin, Some(&issued.token), 1)
            .await;
        assert!(matches!(redirect, Err(VerificationError::InvalidToken)));

        let disabled = verifier
            .authorize_redirect(ProviderKind::Modrinth, Some(&issued.token), 1)
            .await;
        assert!(matches!(disabled, Err(VerificationError::UnknownProvider)));
    }

    #[tokio::test]
    async fn callback_on_wrong_provider_does_not_block_the_right_one() {
        let (_platform, crowdin, verifier) = setup(FakeProvider::new(ProviderKind::Crowdin, 0.0)).await;
        let modrinth = Arc::new(FakeProvider::new(ProviderKind::Modrinth, 0.0));
        let registry = ProviderRegistry::new()
            .with(crowdin.clone())
            .with(modrinth.clone());
        let verifier = Verifier::new(verifier.services().clone(), registry);
        let issued = issue_for(&verifier, ProviderKind::Modrinth, 0).await;

        let wrong = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&issued.token), 1_000)
            .await;
        assert!(matches!(wrong, Err(VerificationError::InvalidState)));
        assert_eq!(crowdin.exchanges.load(Ordering::SeqCst), 0);

        verifier
            .complete(ProviderKind::Modrinth, Some("C"), Some(&issued.token), 2_000)
            .await
            .expect("modrinth callback");
        assert_eq!(modrinth.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_parameters() {
        let (_platform, _provider, verifier) = setup(FakeProvider::new(ProviderKind::Crowdin, 0.0)).await;
        assert!(matches!(
            verifier.authorize_redirect(ProviderKind::Crowdin, Some("  "), 0).await,
            Err(VerificationError::MissingToken)
        ));
        assert!(matches!(
            verifier.complete(ProviderKind::Crowdin, Some("C"), None, 0).await,
            Err(VerificationError::MissingCodeOrState)
        ));
        assert!(matches!(
            verifier.complete(ProviderKind::Crowdin, Some(""), Some("s"), 0).await,
            Err(VerificationError::MissingCodeOrState)
        ));
    }

    #[tokio::test]
    async fn concurrent_callbacks_are_single_flight() {
        let mut fake = FakeProvider::new(ProviderKind::Crowdin, 0.0);
        fake.gate = Some(Notify::new());
        let (_platform, provider, verifier) = setup(fake).await;
        let verifier = Arc::new(verifier);
        let issued = issue_for(&verifier, ProviderKind::Crowdin, 0).await;

        let first = {
            let verifier = Arc::clone(&verifier);
            let token = issued.token.clone();
            tokio::spawn(async move {
                verifier
                    .complete(ProviderKind::Crowdin, Some("C"), Some(&token), 1_000)
                    .await
            })
        };
        provider.started.notified().await;

        let second = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&issued.token), 30_000)
            .await;
        assert!(matches!(second, Err(VerificationError::InProgress)));

        if let Some(gate) = &provider.gate {
            gate.notify_one();
        }
        let first = first.await.expect("task");
        assert!(first.is_ok());
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_keeps_token_until_claim_lapses() {
        let mut fake = FakeProvider::new(ProviderKind::Crowdin, 0.0);
        fake.fail_exchange = true;
        let (platform, provider, verifier) = setup(fake).await;
        let issued = issue_for(&verifier, ProviderKind::Crowdin, 0).await;

        let failed = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&issued.token), 1_000)
            .await;
        let Err(err) = failed else {
            panic!("exchange failure must surface");
        };
        assert!(matches!(err, VerificationError::Failed(_)));
        assert!(!err.to_string().contains("hunter2"));
        assert!(platform.direct_messages_to(USER).is_empty());

        let too_soon = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&issued.token), 30_000)
            .await;
        assert!(matches!(too_soon, Err(VerificationError::InProgress)));

        let retried = verifier
            .complete(ProviderKind::Crowdin, Some("C"), Some(&issued.token), 61_000)
            .await;
        assert!(matches!(retried, Err(VerificationError::Failed(_))));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn purge_removes_expired_tokens() {
        let (_platform, _provider, verifier) = setup(FakeProvider::new(ProviderKind::Crowdin, 0.0)).await;
        issue_for(&verifier, ProviderKind::Crowdin, 0).await;
        issue_for(&verifier, ProviderKind::Crowdin, 10 * 60 * 1000).await;

        let purged = verifier
            .purge_expired(TOKEN_TTL.as_millis() as i64 + 1)
            .await
            .expect("purge");
        assert_eq!(purged, 1);
    }

    #[test]
    fn modrinth_message_reports_weighted_downloads() {
        let message = result_message(
            ProviderKind::Modrinth,
            &Assessment {
                qualifies: false,
                score: 1234.9,
            },
        );
        assert!(message.ends_with("Weighted downloads: 1234."));
    }
}
