//! Upstream providers and their sealed credential accounts.
//!
//! Account token blobs are opaque ciphertext to this crate; sealing and
//! opening happen in tollgate-core so only the crypto module ever sees
//! plaintext credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::clock;
use crate::error::{DbError, DbResult};

/// How a provider authenticates upstream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Oauth,
    ApiKey,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Oauth => write!(f, "oauth"),
            ProviderKind::ApiKey => write!(f, "api_key"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oauth" => Ok(ProviderKind::Oauth),
            "api_key" => Ok(ProviderKind::ApiKey),
            _ => Err(format!("Unknown provider kind: {}", s)),
        }
    }
}

/// Credential account lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Revoked,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "active"),
            AccountStatus::Expired => write!(f, "expired"),
            AccountStatus::Revoked => write!(f, "revoked"),
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "expired" => Ok(AccountStatus::Expired),
            "revoked" => Ok(AccountStatus::Revoked),
            _ => Err(format!("Unknown account status: {}", s)),
        }
    }
}

/// Logical upstream provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub kind: ProviderKind,
    pub enabled: bool,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One credential belonging to a provider. Token ciphertext is not part
/// of this type; fetch it explicitly with
/// [`AccountRepository::sealed_tokens`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAccount {
    pub id: i64,
    pub provider_id: i64,
    pub email: Option<String>,
    pub status: AccountStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const PROVIDER_COLUMNS: &str = "id, name, kind, enabled, settings, created_at, updated_at";
const ACCOUNT_COLUMNS: &str =
    "id, provider_id, email, status, expires_at, last_used_at, created_at";

/// Repository for provider table operations
pub struct ProviderRepository;

impl ProviderRepository {
    /// Get the provider named `name`, creating it if absent.
    pub async fn ensure(pool: &SqlitePool, name: &str, kind: ProviderKind) -> DbResult<Provider> {
        if let Some(provider) = Self::get_by_name(pool, name).await? {
            return Ok(provider);
        }

        let now = clock::now();
        sqlx::query(
            r#"
            INSERT INTO providers (name, kind, enabled, settings, created_at, updated_at)
            VALUES (?, ?, 1, '{}', ?, ?)
            "#,
        )
        .bind(name)
        .bind(kind.to_string())
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .map_err(|e| DbError::on_conflict(e, format!("provider '{}' already exists", name)))?;

        info!("Registered provider {}", name);
        Self::get_by_name(pool, name)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("provider {}", name)))
    }

    /// Get a provider by name.
    pub async fn get_by_name(pool: &SqlitePool, name: &str) -> DbResult<Option<Provider>> {
        let row = sqlx::query_as::<_, ProviderRow>(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM providers WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// List all providers ordered by name.
    pub async fn list(pool: &SqlitePool) -> DbResult<Vec<Provider>> {
        let rows = sqlx::query_as::<_, ProviderRow>(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM providers ORDER BY name"
        ))
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Replace a provider's settings blob.
    pub async fn update_settings(
        pool: &SqlitePool,
        name: &str,
        settings: &serde_json::Value,
    ) -> DbResult<Option<Provider>> {
        let result = sqlx::query("UPDATE providers SET settings = ?, updated_at = ? WHERE name = ?")
            .bind(settings.to_string())
            .bind(clock::now())
            .bind(name)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::get_by_name(pool, name).await
    }

    /// Enable or disable a provider.
    pub async fn set_enabled(pool: &SqlitePool, name: &str, enabled: bool) -> DbResult<bool> {
        let result = sqlx::query("UPDATE providers SET enabled = ?, updated_at = ? WHERE name = ?")
            .bind(enabled as i64)
            .bind(clock::now())
            .bind(name)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a provider. Accounts cascade.
    pub async fn delete(pool: &SqlitePool, name: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM providers WHERE name = ?")
            .bind(name)
            .execute(pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted provider {}", name);
        }
        Ok(deleted)
    }
}

/// Repository for provider account operations
pub struct AccountRepository;

impl AccountRepository {
    /// Create an account, or update the sealed tokens of the existing
    /// account matched by identifying email. The upsert is a single
    /// statement against the `(provider_id, email)` unique index, so
    /// concurrent callbacks for the same identity cannot race into
    /// duplicate rows.
    ///
    /// Accounts without an email are always inserted fresh.
    pub async fn upsert_by_email(
        pool: &SqlitePool,
        provider_id: i64,
        email: Option<&str>,
        sealed_tokens: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> DbResult<ProviderAccount> {
        if let Some(email) = email {
            sqlx::query(
                r#"
                INSERT INTO provider_accounts (provider_id, email, tokens, status, expires_at, created_at)
                VALUES (?, ?, ?, 'active', ?, ?)
                ON CONFLICT(provider_id, email) DO UPDATE
                SET tokens = excluded.tokens, status = 'active', expires_at = excluded.expires_at
                "#,
            )
            .bind(provider_id)
            .bind(email)
            .bind(sealed_tokens)
            .bind(expires_at.map(clock::text))
            .bind(clock::now())
            .execute(pool)
            .await?;

            let row = sqlx::query_as::<_, AccountRow>(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM provider_accounts
                 WHERE provider_id = ? AND email = ?"
            ))
            .bind(provider_id)
            .bind(email)
            .fetch_one(pool)
            .await?;

            info!("Stored credential account {} for provider {}", row.id, provider_id);
            return Ok(row.into());
        }

        let result = sqlx::query(
            r#"
            INSERT INTO provider_accounts (provider_id, email, tokens, status, expires_at, created_at)
            VALUES (?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(provider_id)
        .bind(email)
        .bind(sealed_tokens)
        .bind(expires_at.map(clock::text))
        .bind(clock::now())
        .execute(pool)
        .await?;

        let id = result.last_insert_rowid();
        info!("Stored credential account {} for provider {}", id, provider_id);

        Self::get(pool, id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("account {}", id)))
    }

    /// Get an account by id.
    pub async fn get(pool: &SqlitePool, id: i64) -> DbResult<Option<ProviderAccount>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM provider_accounts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// List the accounts of a provider, oldest first.
    pub async fn list_for_provider(
        pool: &SqlitePool,
        provider_id: i64,
    ) -> DbResult<Vec<ProviderAccount>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM provider_accounts WHERE provider_id = ? ORDER BY id"
        ))
        .bind(provider_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Count a provider's accounts.
    pub async fn count_for_provider(pool: &SqlitePool, provider_id: i64) -> DbResult<i64> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM provider_accounts WHERE provider_id = ?")
                .bind(provider_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    /// Fetch the opaque token ciphertext of an account.
    pub async fn sealed_tokens(pool: &SqlitePool, id: i64) -> DbResult<Option<String>> {
        let tokens = sqlx::query_scalar("SELECT tokens FROM provider_accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(tokens)
    }

    /// Replace an account's sealed tokens in place (refresh).
    pub async fn update_tokens(
        pool: &SqlitePool,
        id: i64,
        sealed_tokens: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE provider_accounts SET tokens = ?, status = 'active', expires_at = ? WHERE id = ?",
        )
        .bind(sealed_tokens)
        .bind(expires_at.map(clock::text))
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set an account's lifecycle status.
    pub async fn set_status(pool: &SqlitePool, id: i64, status: AccountStatus) -> DbResult<bool> {
        let result = sqlx::query("UPDATE provider_accounts SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record that an account's credentials were exercised.
    pub async fn touch_last_used(pool: &SqlitePool, id: i64) -> DbResult<()> {
        sqlx::query("UPDATE provider_accounts SET last_used_at = ? WHERE id = ?")
            .bind(clock::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Delete one account of a provider.
    pub async fn delete(pool: &SqlitePool, provider_id: i64, id: i64) -> DbResult<bool> {
        let result =
            sqlx::query("DELETE FROM provider_accounts WHERE id = ? AND provider_id = ?")
                .bind(id)
                .bind(provider_id)
                .execute(pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct ProviderRow {
    id: i64,
    name: String,
    kind: String,
    enabled: i64,
    settings: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProviderRow> for Provider {
    fn from(row: ProviderRow) -> Self {
        Provider {
            id: row.id,
            name: row.name,
            kind: row.kind.parse().unwrap_or(ProviderKind::Oauth),
            enabled: row.enabled != 0,
            settings: serde_json::from_str(&row.settings).unwrap_or(serde_json::json!({})),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    provider_id: i64,
    email: Option<String>,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for ProviderAccount {
    fn from(row: AccountRow) -> Self {
        ProviderAccount {
            id: row.id,
            provider_id: row.provider_id,
            email: row.email,
            status: row.status.parse().unwrap_or(AccountStatus::Active),
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
        }
    }
}
