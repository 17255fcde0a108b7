//! Modrinth OAuth, public project lookups and creator assessment.

use std::sync::Arc;

use serde::Deserialize;
use serenity::async_trait;

use super::{
    check_status, provider_limiter, Assessment, OAuthProvider, ProviderIdentity, ProviderLimiter,
    TokenSet, REQUESTS_PER_SECOND,
};
use crate::config::OAuthClientConfig;
use crate::error::{BotError, Result};
use crate::models::ProviderKind;

const AUTHORIZE_URL: &str = "https://modrinth.com/auth/authorize";
const API_BASE: &str = "https://api.modrinth.com";
const PROJECT_PAGE: &str = "https://modrinth.com/project";

/// Download weight per project type. Unknown types weigh 1.
pub fn project_weight(project_type: &str) -> f64 {
    match project_type {
        "plugin" | "shader" => 3.0,
        "modpack" => 0.2,
        _ => 1.0,
    }
}

/// A public project as returned by `/v2/project/{id}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProjectSummary {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub project_type: String,
    #[serde(default)]
    pub downloads: Option<u64>,
}

impl ProjectSummary {
    pub fn url(&self) -> String {
        format!("{}/{}", PROJECT_PAGE, self.slug)
    }
}

/// Sum of downloads weighted by project type.
pub fn weighted_downloads(projects: &[ProjectSummary]) -> f64 {
    projects
        .iter()
        .map(|p| project_weight(&p.project_type) * p.downloads.unwrap_or(0) as f64)
        .sum()
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

/// Looks up public projects; backs the `/project` command.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn project(&self, id: &str) -> Result<ProjectSummary>;
}

/// Client for the Modrinth v2 API.
#[derive(Clone)]
pub struct ModrinthApi {
    http: reqwest::Client,
    base: String,
    limiter: Arc<ProviderLimiter>,
}

impl ModrinthApi {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base: API_BASE.to_string(),
            limiter: provider_limiter(REQUESTS_PER_SECOND),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        access_token: Option<&str>,
    ) -> Result<T> {
        self.limiter.until_ready().await;
        let mut request = self.http.get(self.url(path));
        if let Some(token) = access_token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }
        let response = request.send().await?;
        let response = check_status(response, &format!("Modrinth GET {}", path), BotError::Provider).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn get_project(&self, id: &str) -> Result<ProjectSummary> {
        self.get_json(&format!("/v2/project/{}", urlencoding::encode(id)), None)
            .await
    }

    pub async fn user_projects(&self, user_id: &str) -> Result<Vec<ProjectSummary>> {
        self.get_json(&format!("/v2/user/{}/projects", urlencoding::encode(user_id)), None)
            .await
    }

    async fn current_user(&self, access_token: &str) -> Result<CurrentUser> {
        self.get_json("/v2/user", Some(access_token)).await
    }
}

#[async_trait]
impl ProjectSource for ModrinthApi {
    async fn project(&self, id: &str) -> Result<ProjectSummary> {
        self.get_project(id).await
    }
}

pub struct ModrinthProvider {
    client_id: String,
    client_secret: String,
    scopes: String,
    redirect_uri: String,
    downloads_threshold: f64,
    authorize_base: String,
    api: ModrinthApi,
}

impl ModrinthProvider {
    pub fn new(
        config: &OAuthClientConfig,
        redirect_uri: String,
        downloads_threshold: f64,
        api: ModrinthApi,
    ) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scopes.clone(),
            redirect_uri,
            downloads_threshold,
            authorize_base: AUTHORIZE_URL.to_string(),
            api,
        }
    }

    /// Whether a weighted download total earns the creator role.
    pub fn qualifies(&self, weighted: f64) -> bool {
        weighted >= self.downloads_threshold
    }
}

#[async_trait]
impl OAuthProvider for ModrinthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Modrinth
    }

    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&response_type=code&scope={}&state={}&redirect_uri={}",
            self.authorize_base,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.scopes),
            urlencoding::encode(state),
            urlencoding::encode(&self.redirect_uri),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        self.api.limiter.until_ready().await;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        let response = self
            .api
            .http
            .post(self.api.url("/_internal/oauth/token"))
            .header(reqwest::header::AUTHORIZATION, &self.client_secret)
            .form(&params)
            .send()
            .await?;
        let response = check_status(response, "Modrinth token exchange", BotError::OAuth).await?;
        Ok(response.json::<TokenSet>().await?)
    }

    async fn identity(&self, access_token: &str) -> Result<ProviderIdentity> {
        let user = self.api.current_user(access_token).await?;
        Ok(ProviderIdentity {
            id: user.id,
            username: user.username,
        })
    }

    async fn assess(&self, _access_token: &str, identity: &ProviderIdentity) -> Result<Assessment> {
        let projects = self.api.user_projects(&identity.id).await?;
        let weighted = weighted_downloads(&projects);
        tracing::info!(
            modrinth_user_id = %identity.id,
            projects = projects.len(),
            weighted_downloads = weighted,
            "Modrinth creator checked"
        );
        Ok(Assessment {
            qualifies: self.qualifies(weighted),
            score: weighted,
        })
    }
}
