//! Steward - community moderation bot.
//!
//! Wires configuration, the database, the listener pipelines, slash commands,
//! the verification web server and background tasks, then runs the gateway client.

use std::sync::Arc;
use std::time::Duration;

use serenity::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use steward::commands::default_dispatcher;
use steward::config::BotConfig;
use steward::cooldown::CooldownTracker;
use steward::database::Database;
use steward::discord::DiscordPlatform;
use steward::error::{BotError, Result};
use steward::gateway::{self, Gateway};
use steward::listeners;
use steward::models::ProviderKind;
use steward::pipeline::{PipelineHooks, Services, TracingHooks};
use steward::providers::modrinth::{ModrinthApi, ProjectSource};
use steward::providers::ProviderRegistry;
use steward::threads;
use steward::verification::Verifier;
use steward::web;

const COOLDOWN_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const VERIFICATION_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);
const INACTIVE_THREAD_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Spawn background tasks for periodic operations.
fn spawn_background_tasks(services: Services, cooldowns: Arc<CooldownTracker>, verifier: Arc<Verifier>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COOLDOWN_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = cooldowns.sweep_expired(now_ms());
            if removed > 0 {
                tracing::debug!(removed = removed, remaining = cooldowns.len(), "Swept expired cooldowns");
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(VERIFICATION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match verifier.purge_expired(now_ms()).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged = purged, "Purged expired verifications"),
                Err(e) => tracing::error!(error = %e, "Failed to purge expired verifications"),
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(INACTIVE_THREAD_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match threads::sweep_inactive(services.platform.as_ref(), &services.config, now_ms()).await {
                Ok(report) => tracing::info!(
                    checked = report.checked,
                    warned = report.warned,
                    archived = report.archived,
                    failed = report.failed,
                    "Swept inactive support threads"
                ),
                Err(e) => tracing::warn!(error = %e, "Inactive thread sweep failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // RUST_LOG overrides the default `info` level, e.g. RUST_LOG=steward=debug
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT"),
        "Steward starting..."
    );

    let config = Arc::new(BotConfig::from_env()?);
    tracing::info!("Configuration loaded");

    let db = Arc::new(Database::new(&config.database_path).await?);
    tracing::info!(path = %config.database_path, "Database initialized");

    let http = Arc::new(serenity::http::Http::new(&config.discord_token));
    let services = Services {
        platform: Arc::new(DiscordPlatform::new(http)),
        db,
        config: Arc::clone(&config),
    };

    // Listener and command cooldown keys never collide, so one tracker serves both.
    let cooldowns = Arc::new(CooldownTracker::new());
    let hooks: Arc<dyn PipelineHooks> = Arc::new(TracingHooks);
    let messages = listeners::message_pipeline(&config, Arc::clone(&cooldowns), Arc::clone(&hooks))?;
    let reactions = listeners::reaction_pipeline(&config, Arc::clone(&cooldowns), hooks);
    tracing::info!(
        create = messages.create_listener_ids().len(),
        update = messages.update_listener_ids().len(),
        delete = messages.delete_listener_ids().len(),
        reaction = reactions.add_listener_ids().len(),
        "Listener pipelines built"
    );

    let provider_http = reqwest::Client::builder()
        .user_agent(concat!("steward/", env!("CARGO_PKG_VERSION")))
        .timeout(PROVIDER_TIMEOUT)
        .build()?;
    let projects: Arc<dyn ProjectSource> = Arc::new(ModrinthApi::new(provider_http.clone()));
    let commands = default_dispatcher(&config, Arc::clone(&cooldowns), projects);
    tracing::info!(commands = ?commands.names(), "Slash command dispatcher initialized");

    let providers = ProviderRegistry::from_config(&config, provider_http);
    for provider in ProviderKind::ALL {
        if providers.is_enabled(provider) {
            tracing::info!(provider = %provider, "Verification provider enabled");
        } else {
            tracing::warn!(provider = %provider, "Verification provider disabled: client credentials not configured");
        }
    }
    let verifier = Arc::new(Verifier::new(services.clone(), providers));

    spawn_background_tasks(services.clone(), Arc::clone(&cooldowns), Arc::clone(&verifier));
    tracing::info!("Background tasks spawned");

    let web_state = web::AppState::new(verifier);
    let port = config.port;
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, port).await {
            tracing::error!(error = %e, "Web server error");
        }
    });

    let handler = Gateway::new(services, messages, reactions, commands);
    let mut client = Client::builder(&config.discord_token, gateway::intents())
        .event_handler(handler)
        .await
        .map_err(|e| BotError::DiscordApi(Box::new(e)))?;

    tracing::info!("Starting Discord client...");

    client
        .start()
        .await
        .map_err(|e| BotError::DiscordApi(Box::new(e)))?;

    Ok(())
}
