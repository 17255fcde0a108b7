//! HTTP surface: health check and the OAuth verification endpoints.
//!
//! - `GET /healthz` liveness plus a database check, optionally limited to known source IPs
//! - `GET /{provider}/verify?token=` validates a token and redirects to the provider
//! - `GET /callback/{provider}?code=&state=` completes the verification

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::{ConnectInfo, Path, Query, Request, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};

use crate::database::Database;
use crate::error::{BotError, Result};
use crate::models::ProviderKind;
use crate::verification::{VerificationError, Verifier};

const CLOSE_PAGE: &str = "<!doctype html><html><head><meta charset=\"utf-8\"><title>Verification complete</title></head>\
<body><p>Verification complete. You can close this tab and return to Discord.</p>\
<script>window.close()</script></body></html>";

/// Request logging middleware layer
#[derive(Clone)]
pub struct RequestLoggingLayer;

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggingService { inner }
    }
}

/// Logs every request with method, path, status and response time.
///
/// Only the path is logged; query strings carry verification tokens and OAuth codes.
#[derive(Clone)]
pub struct RequestLoggingService<S> {
    inner: S,
}

impl<S> Service<Request> for RequestLoggingService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let start = std::time::Instant::now();

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;
            let duration = start.elapsed();

            tracing::info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                duration_ms = duration.as_millis() as u64,
                "HTTP request"
            );

            Ok(response)
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<Verifier>,
    pub db: Arc<Database>,
    /// Source addresses allowed to read `/healthz`; empty means anyone.
    pub healthz_allowed_ips: Arc<Vec<IpAddr>>,
}

impl AppState {
    pub fn new(verifier: Arc<Verifier>) -> Self {
        let services = verifier.services();
        Self {
            db: Arc::clone(&services.db),
            healthz_allowed_ips: Arc::new(services.config.healthz_allowed_ips.clone()),
            verifier,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub timestamp: &'static str,
    pub commit: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub build: BuildInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

impl VerificationError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::InvalidToken
            | Self::MissingCodeOrState
            | Self::InvalidState => StatusCode::BAD_REQUEST,
            Self::InProgress => StatusCode::TOO_MANY_REQUESTS,
            Self::UnknownProvider => StatusCode::NOT_FOUND,
            Self::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for VerificationError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_provider(raw: &str) -> std::result::Result<ProviderKind, VerificationError> {
    raw.parse().map_err(|_| VerificationError::UnknownProvider)
}

fn ip_allowed(allowed: &[IpAddr], ip: IpAddr) -> bool {
    allowed.is_empty() || allowed.contains(&ip.to_canonical())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/{provider}/verify", get(verify_redirect))
        .route("/callback/{provider}", get(oauth_callback))
        .layer(RequestLoggingLayer)
        .with_state(state)
}

/// Bind `port` on all interfaces and serve until the task is dropped.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BotError::Config(format!("Failed to bind port {}: {}", port, e)))?;
    tracing::info!(port = port, "Web server listening");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| BotError::InternalState(format!("Web server failed: {}", e)))
}

async fn healthz(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    if !ip_allowed(&state.healthz_allowed_ips, remote.ip()) {
        tracing::debug!(remote = %remote.ip(), "Health check from unlisted address");
        return (StatusCode::FORBIDDEN, Json(ErrorResponse::new("Forbidden"))).into_response();
    }

    let build = BuildInfo {
        timestamp: env!("BUILD_TIMESTAMP"),
        commit: env!("GIT_COMMIT"),
    };
    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "ok",
                build,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Health check database probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    database: "unavailable",
                    build,
                }),
            )
                .into_response()
        }
    }
}

async fn verify_redirect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> std::result::Result<Redirect, VerificationError> {
    let provider = parse_provider(&provider)?;
    let url = state
        .verifier
        .authorize_redirect(provider, query.token.as_deref(), now_ms())
        .await?;
    Ok(Redirect::to(&url))
}

async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> std::result::Result<Response, VerificationError> {
    let provider = parse_provider(&provider)?;
    let completed = state
        .verifier
        .complete(
            provider,
            query.code.as_deref(),
            query.state.as_deref(),
            now_ms(),
        )
        .await?;

    Ok(match completed.redirect_to {
        Some(target) => Redirect::to(&target).into_response(),
        None => Html(CLOSE_PAGE).into_response(),
    })
}
