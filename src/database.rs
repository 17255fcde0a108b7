//! SQLite database for persistent storage.
//!
//! Holds per-user activity counters, pending OAuth verifications and linked
//! provider accounts. Every mutation is a single atomic statement so concurrent
//! events for the same user never need read-then-write in application code.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::{BotError, Result};
use crate::models::{ProviderKind, UserRecord};

/// A pending verification as stored in `oauth_verifications`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub token: String,
    pub provider: ProviderKind,
    pub discord_user_id: u64,
    /// Epoch milliseconds.
    pub expires_at: i64,
    pub redirect_to: Option<String>,
}

/// Result of trying to claim a verification for callback processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the verification until the claim window passes.
    Claimed(VerificationRecord),
    /// Another callback claimed it less than a window ago.
    InProgress,
    /// Unknown, consumed or expired.
    Invalid,
}

/// Provider account linked to a Discord user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedAccount {
    pub discord_user_id: u64,
    pub provider: ProviderKind,
    pub provider_user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token expiry, epoch milliseconds.
    pub expires_at: Option<i64>,
    pub organization_domain: Option<String>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection.
    ///
    /// Creates the database file and initializes schema if needed.
    pub async fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BotError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| BotError::Database(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Create an in-memory database for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| BotError::Database(format!("Failed to create in-memory db: {}", e)))?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| BotError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BotError::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    // ========== Activity ==========

    /// Add one to a user's message counter, creating the row at 1, and return the new value.
    pub async fn increment_messages(&self, user_id: u64) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO users (id, messages_sent) VALUES (?, 1)
             ON CONFLICT(id) DO UPDATE SET messages_sent = messages_sent + 1
             RETURNING messages_sent",
        )
        .bind(user_id as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BotError::Database(format!("Failed to increment messages: {}", e)))?;

        Ok(row.get::<i64, _>("messages_sent"))
    }

    pub async fn user(&self, user_id: u64) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, messages_sent, crowdin_user_id, modrinth_user_id FROM users WHERE id = ?",
        )
        .bind(user_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BotError::Database(format!("Failed to get user: {}", e)))?;

        Ok(row.map(|row| UserRecord {
            id: row.get::<i64, _>("id") as u64,
            messages_sent: row.get("messages_sent"),
            crowdin_user_id: row.get("crowdin_user_id"),
            modrinth_user_id: row.get("modrinth_user_id"),
        }))
    }

    /// Zero a user's counter. Returns whether the user had a record.
    pub async fn reset_messages(&self, user_id: u64) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET messages_sent = 0 WHERE id = ?")
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| BotError::Database(format!("Failed to reset messages: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the provider identity on the user row, creating the row if needed.
    pub async fn link_provider_identity(
        &self,
        user_id: u64,
        provider: ProviderKind,
        provider_user_id: &str,
    ) -> Result<()> {
        let query = match provider {
            ProviderKind::Crowdin => {
                "INSERT INTO users (id, crowdin_user_id) VALUES (?, ?)
                 ON CONFLICT(id) DO UPDATE SET crowdin_user_id = excluded.crowdin_user_id"
            }
            ProviderKind::Modrinth => {
                "INSERT INTO users (id, modrinth_user_id) VALUES (?, ?)
                 ON CONFLICT(id) DO UPDATE SET modrinth_user_id = excluded.modrinth_user_id"
            }
        };

        sqlx::query(query)
            .bind(user_id as i64)
            .bind(provider_user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| BotError::Database(format!("Failed to link identity: {}", e)))?;

        Ok(())
    }

    // ========== Verifications ==========

    pub async fn create_verification(&self, record: &VerificationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO oauth_verifications (token, provider, discord_user_id, expires_at, redirect_to)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.token)
        .bind(record.provider.as_str())
        .bind(record.discord_user_id as i64)
        .bind(record.expires_at)
        .bind(&record.redirect_to)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Database(format!("Failed to create verification: {}", e)))?;

        Ok(())
    }

    /// Look up a verification that has not expired at `now_ms`.
    pub async fn find_verification(
        &self,
        token: &str,
        now_ms: i64,
    ) -> Result<Option<VerificationRecord>> {
        let row = sqlx::query(
            "SELECT token, provider, discord_user_id, expires_at, redirect_to
             FROM oauth_verifications WHERE token = ? AND expires_at > ?",
        )
        .bind(token)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BotError::Database(format!("Failed to find verification: {}", e)))?;

        row.as_ref().map(verification_from_row).transpose()
    }

    /// Atomically claim a live verification for callback processing.
    ///
    /// Succeeds when the row belongs to `provider`, is unexpired and is either
    /// unclaimed or claimed at least `claim_window_ms` ago, so a crashed callback
    /// does not block the token forever. A provider mismatch never claims.
    pub async fn claim_verification(
        &self,
        token: &str,
        provider: ProviderKind,
        now_ms: i64,
        claim_window_ms: i64,
    ) -> Result<ClaimOutcome> {
        let claimed = sqlx::query(
            "UPDATE oauth_verifications SET claimed_at = ?
             WHERE token = ? AND provider = ? AND expires_at > ?
               AND (claimed_at IS NULL OR claimed_at <= ?)
             RETURNING token, provider, discord_user_id, expires_at, redirect_to",
        )
        .bind(now_ms)
        .bind(token)
        .bind(provider.as_str())
        .bind(now_ms)
        .bind(now_ms - claim_window_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BotError::Database(format!("Failed to claim verification: {}", e)))?;

        if let Some(row) = claimed {
            return Ok(ClaimOutcome::Claimed(verification_from_row(&row)?));
        }

        let live = sqlx::query(
            "SELECT 1 FROM oauth_verifications WHERE token = ? AND provider = ? AND expires_at > ?",
        )
        .bind(token)
        .bind(provider.as_str())
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BotError::Database(format!("Failed to check verification: {}", e)))?;

        Ok(if live.is_some() {
            ClaimOutcome::InProgress
        } else {
            ClaimOutcome::Invalid
        })
    }

    /// Delete a verification. Returns whether a row was removed.
    pub async fn delete_verification(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM oauth_verifications WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| BotError::Database(format!("Failed to delete verification: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove verifications that expired before `now_ms`.
    pub async fn purge_expired_verifications(&self, now_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM oauth_verifications WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map_err(|e| BotError::Database(format!("Failed to purge verifications: {}", e)))?;

        Ok(result.rows_affected())
    }

    // ========== Linked accounts ==========

    /// Insert or replace the linked account for a user and provider.
    pub async fn upsert_linked_account(&self, account: &LinkedAccount) -> Result<()> {
        sqlx::query(
            "INSERT INTO linked_accounts
                (discord_user_id, provider, provider_user_id, access_token, refresh_token, expires_at, organization_domain, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(discord_user_id, provider) DO UPDATE SET
                provider_user_id = excluded.provider_user_id,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                organization_domain = excluded.organization_domain,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(account.discord_user_id as i64)
        .bind(account.provider.as_str())
        .bind(&account.provider_user_id)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.expires_at)
        .bind(&account.organization_domain)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Database(format!("Failed to upsert linked account: {}", e)))?;

        Ok(())
    }

    pub async fn linked_account(
        &self,
        discord_user_id: u64,
        provider: ProviderKind,
    ) -> Result<Option<LinkedAccount>> {
        let row = sqlx::query(
            "SELECT discord_user_id, provider, provider_user_id, access_token, refresh_token, expires_at, organization_domain
             FROM linked_accounts WHERE discord_user_id = ? AND provider = ?",
        )
        .bind(discord_user_id as i64)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BotError::Database(format!("Failed to get linked account: {}", e)))?;

        Ok(row.map(|row| LinkedAccount {
            discord_user_id: row.get::<i64, _>("discord_user_id") as u64,
            provider,
            provider_user_id: row.get("provider_user_id"),
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            expires_at: row.get("expires_at"),
            organization_domain: row.get("organization_domain"),
        }))
    }

    /// Number of linked accounts for a provider.
    pub async fn count_linked_accounts(&self, provider: ProviderKind) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM linked_accounts WHERE provider = ?")
            .bind(provider.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BotError::Database(format!("Failed to count linked accounts: {}", e)))?;

        Ok(row.get("n"))
    }
}

fn verification_from_row(row: &SqliteRow) -> Result<VerificationRecord> {
    let provider: String = row.get("provider");
    let provider = provider
        .parse::<ProviderKind>()
        .map_err(BotError::Database)?;

    Ok(VerificationRecord {
        token: row.get("token"),
        provider,
        discord_user_id: row.get::<i64, _>("discord_user_id") as u64,
        expires_at: row.get("expires_at"),
        redirect_to: row.get("redirect_to"),
    })
}

const SCHEMA: &str = r#"
-- Per-user activity and linked identities
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    messages_sent INTEGER NOT NULL DEFAULT 0,
    crowdin_user_id TEXT,
    modrinth_user_id TEXT
);

-- Pending OAuth verifications; claimed_at marks a callback in flight
CREATE TABLE IF NOT EXISTS oauth_verifications (
    token TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    discord_user_id INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    redirect_to TEXT,
    claimed_at INTEGER
);

-- Provider accounts linked through a completed verification
CREATE TABLE IF NOT EXISTS linked_accounts (
    discord_user_id INTEGER NOT NULL,
    provider TEXT NOT NULL,
    provider_user_id TEXT NOT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    expires_at INTEGER,
    organization_domain TEXT,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (discord_user_id, provider)
);

CREATE INDEX IF NOT EXISTS idx_oauth_verifications_expires ON oauth_verifications(expires_at);
"#;
