//! Crowdin OAuth and contribution lookup.
//!
//! Contributions come from the project's "top members" report. Generating it
//! is slow (create, poll, download), so rows are cached per project for a
//! minute and concurrent loads for the same project share one generation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::{json, Value};
use serenity::async_trait;

use super::{
    check_status, provider_limiter, Assessment, OAuthProvider, ProviderIdentity, ProviderLimiter,
    TokenSet, REQUESTS_PER_SECOND,
};
use crate::config::CrowdinConfig;
use crate::error::{BotError, Result};
use crate::models::ProviderKind;

const ACCOUNTS_BASE: &str = "https://accounts.crowdin.com";
const API_BASE: &str = "https://api.crowdin.com/api/v2";
const REPORT_TTL: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: u32 = 30;

/// One row of the top-members report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportRow {
    #[serde(default)]
    pub user: Option<ReportUser>,
    #[serde(default)]
    pub translated: Option<f64>,
    #[serde(default)]
    pub approved: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportUser {
    /// Numeric in practice, but reports have carried it as a string too.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Translated and approved string counts for one member.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemberActivity {
    pub translated: f64,
    pub approved: f64,
}

impl MemberActivity {
    pub fn has_contribution(&self) -> bool {
        self.translated > 0.0 || self.approved > 0.0
    }
}

fn id_matches(value: &Value, user_id: &str) -> bool {
    match value {
        Value::Number(n) => n.to_string() == user_id,
        Value::String(s) => s == user_id,
        _ => false,
    }
}

/// Find a member's row by id, falling back to a case-insensitive username match.
pub fn find_member_row<'a>(
    rows: &'a [ReportRow],
    user_id: &str,
    username: Option<&str>,
) -> Option<&'a ReportRow> {
    let by_id = rows.iter().find(|row| {
        row.user
            .as_ref()
            .and_then(|u| u.id.as_ref())
            .is_some_and(|id| id_matches(id, user_id))
    });
    if by_id.is_some() {
        return by_id;
    }

    let target = username?.to_lowercase();
    rows.iter().find(|row| {
        row.user
            .as_ref()
            .and_then(|u| u.username.as_deref())
            .is_some_and(|name| name.to_lowercase() == target)
    })
}

pub fn activity_of(row: Option<&ReportRow>) -> MemberActivity {
    row.map(|r| MemberActivity {
        translated: r.translated.unwrap_or(0.0),
        approved: r.approved.unwrap_or(0.0),
    })
    .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: Value,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportCreated {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ReportDownload {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ProjectMember {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportFile {
    #[serde(default)]
    data: Vec<ReportRow>,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct CrowdinProvider {
    client_id: String,
    client_secret: String,
    scopes: String,
    redirect_uri: String,
    project_id: Option<u64>,
    service_token: Option<String>,
    accounts_base: String,
    api_base: String,
    poll_interval: Duration,
    http: reqwest::Client,
    limiter: Arc<ProviderLimiter>,
    reports: Cache<u64, Arc<Vec<ReportRow>>>,
}

impl CrowdinProvider {
    pub fn new(config: &CrowdinConfig, redirect_uri: String, http: reqwest::Client) -> Self {
        Self {
            client_id: config.oauth.client_id.clone(),
            client_secret: config.oauth.client_secret.clone(),
            scopes: config.oauth.scopes.clone(),
            redirect_uri,
            project_id: config.project_id,
            service_token: config.api_token.clone(),
            accounts_base: ACCOUNTS_BASE.to_string(),
            api_base: API_BASE.to_string(),
            poll_interval: POLL_INTERVAL,
            http,
            limiter: provider_limiter(REQUESTS_PER_SECOND),
            reports: Cache::builder()
                .max_capacity(64)
                .time_to_live(REPORT_TTL)
                .build(),
        }
    }

    /// Point the provider at other hosts, e.g. a local stand-in.
    pub fn with_endpoints(mut self, accounts_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.accounts_base = accounts_base.into();
        self.api_base = api_base.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn api_get<T: serde::de::DeserializeOwned>(&self, endpoint: &str, token: &str) -> Result<T> {
        self.limiter.until_ready().await;
        let response = self
            .http
            .get(format!("{}{}", self.api_base, endpoint))
            .bearer_auth(token)
            .send()
            .await?;
        let response = check_status(response, &format!("Crowdin GET {}", endpoint), BotError::Provider).await?;
        Ok(response.json::<T>().await?)
    }

    async fn api_post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        token: &str,
        body: &Value,
    ) -> Result<T> {
        self.limiter.until_ready().await;
        let response = self
            .http
            .post(format!("{}{}", self.api_base, endpoint))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let response = check_status(response, &format!("Crowdin POST {}", endpoint), BotError::Provider).await?;
        Ok(response.json::<T>().await?)
    }

    /// Create the top-members report and wait for it. Returns the download URL.
    async fn generate_report(&self, project_id: u64, token: &str) -> Result<String> {
        let now: DateTime<Utc> = Utc::now();
        let created: Envelope<ReportCreated> = self
            .api_post(
                &format!("/projects/{}/reports", project_id),
                token,
                &json!({
                    "name": "top-members",
                    "schema": {
                        "unit": "strings",
                        "format": "json",
                        "dateFrom": DateTime::<Utc>::UNIX_EPOCH.to_rfc3339(),
                        "dateTo": now.to_rfc3339(),
                    }
                }),
            )
            .await?;

        let report_id = created
            .data
            .identifier
            .or_else(|| created.data.id.as_ref().map(value_to_string))
            .ok_or_else(|| BotError::Provider("Crowdin report has no identifier".to_string()))?;

        let mut finished = false;
        for _ in 0..MAX_POLLS {
            tokio::time::sleep(self.poll_interval).await;
            let status: Envelope<ReportStatus> = self
                .api_get(&format!("/projects/{}/reports/{}", project_id, report_id), token)
                .await?;
            match status.data.status.as_str() {
                "finished" => {
                    finished = true;
                    break;
                }
                "failed" => {
                    return Err(BotError::Provider("Crowdin report generation failed".to_string()))
                }
                _ => {}
            }
        }
        if !finished {
            return Err(BotError::Provider("Crowdin report generation timed out".to_string()));
        }

        let download: Envelope<ReportDownload> = self
            .api_get(
                &format!("/projects/{}/reports/{}/download", project_id, report_id),
                token,
            )
            .await?;
        Ok(download.data.url)
    }

    async fn load_report_rows(&self, project_id: u64, token: &str) -> Result<Vec<ReportRow>> {
        let url = self.generate_report(project_id, token).await?;
        self.limiter.until_ready().await;
        let response = self.http.get(&url).send().await?;
        let response = check_status(response, "Crowdin report download", BotError::Provider).await?;
        let file: ReportFile = response.json().await?;
        tracing::debug!(project_id = project_id, rows = file.data.len(), "Crowdin report loaded");
        Ok(file.data)
    }

    /// Report rows for a project, cached; concurrent callers share one load.
    pub async fn report_rows(&self, project_id: u64, token: &str) -> Result<Arc<Vec<ReportRow>>> {
        self.reports
            .try_get_with(project_id, async {
                self.load_report_rows(project_id, token).await.map(Arc::new)
            })
            .await
            .map_err(|e| BotError::Provider(e.to_string()))
    }

    async fn member_username(&self, project_id: u64, user_id: &str, token: &str) -> Option<String> {
        let result: Result<Envelope<ProjectMember>> = self
            .api_get(&format!("/projects/{}/members/{}", project_id, user_id), token)
            .await;
        match result {
            Ok(member) => member.data.username,
            Err(e) => {
                tracing::debug!(error = %e, user_id = %user_id, "Crowdin member lookup failed");
                None
            }
        }
    }

    /// Translated and approved counts for a member of the configured project.
    pub async fn member_activity(&self, project_id: u64, user_id: &str, token: &str) -> Result<MemberActivity> {
        let rows = self.report_rows(project_id, token).await?;
        if let Some(row) = find_member_row(&rows, user_id, None) {
            return Ok(activity_of(Some(row)));
        }

        let username = self.member_username(project_id, user_id, token).await;
        let row = find_member_row(&rows, user_id, username.as_deref());
        if row.is_none() {
            tracing::debug!(user_id = %user_id, project_id = project_id, "No Crowdin activity found");
        }
        Ok(activity_of(row))
    }
}

#[async_trait]
impl OAuthProvider for CrowdinProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Crowdin
    }

    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/oauth/authorize?client_id={}&response_type=code&scope={}&state={}&redirect_uri={}",
            self.accounts_base,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.scopes),
            urlencoding::encode(state),
            urlencoding::encode(&self.redirect_uri),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        self.limiter.until_ready().await;
        let response = self
            .http
            .post(format!("{}/oauth/token", self.accounts_base))
            .json(&json!({
                "grant_type": "authorization_code",
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "redirect_uri": self.redirect_uri,
                "code": code,
            }))
            .send()
            .await?;
        let response = check_status(response, "Crowdin token exchange", BotError::OAuth).await?;
        Ok(response.json::<TokenSet>().await?)
    }

    async fn identity(&self, access_token: &str) -> Result<ProviderIdentity> {
        let user: Envelope<CurrentUser> = self.api_get("/user", access_token).await?;
        Ok(ProviderIdentity {
            id: value_to_string(&user.data.id),
            username: user.data.username,
        })
    }

    /// Contribution lookup failures are logged and count as no contribution.
    async fn assess(&self, _access_token: &str, identity: &ProviderIdentity) -> Result<Assessment> {
        let none = Assessment {
            qualifies: false,
            score: 0.0,
        };
        let Some(project_id) = self.project_id else {
            return Ok(none);
        };
        let Some(token) = self.service_token.as_deref() else {
            tracing::error!("CROWDIN_TOKEN is not set; cannot check contributions");
            return Ok(none);
        };

        match self.member_activity(project_id, &identity.id, token).await {
            Ok(activity) => {
                tracing::info!(
                    crowdin_user_id = %identity.id,
                    translated = activity.translated,
                    approved = activity.approved,
                    "Crowdin contribution checked"
                );
                Ok(Assessment {
                    qualifies: activity.has_contribution(),
                    score: activity.translated + activity.approved,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, crowdin_user_id = %identity.id, "Crowdin contribution check failed");
                Ok(none)
            }
        }
    }
}
