//! End-user records and API key digests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::clock;
use crate::error::{DbError, DbResult};

/// End-user record as exposed to the admin API.
///
/// The key digest never leaves the store through this type; data-plane
/// lookups that need it use [`UserWithHash`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub api_key_prefix: String,
    pub quota_tokens: Option<i64>,
    pub used_tokens: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// User row joined with its key digest, for bearer verification.
#[derive(Debug, Clone)]
pub struct UserWithHash {
    pub user: User,
    pub api_key_hash: String,
}

/// Partial update of a user row. `quota_tokens: Some(None)` clears the
/// quota (unlimited); `None` leaves it untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub quota_tokens: Option<Option<i64>>,
    pub enabled: Option<bool>,
}

const USER_COLUMNS: &str =
    "id, name, api_key_prefix, quota_tokens, used_tokens, enabled, created_at, last_used_at";

/// Repository for user table operations
pub struct UserRepository;

impl UserRepository {
    /// Create a user with a pre-digested API key.
    ///
    /// Name and prefix collisions surface as [`DbError::Conflict`].
    pub async fn create(
        pool: &SqlitePool,
        name: &str,
        quota_tokens: Option<i64>,
        api_key_prefix: &str,
        api_key_hash: &str,
    ) -> DbResult<User> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, api_key_prefix, api_key_hash, quota_tokens, used_tokens, enabled, created_at)
            VALUES (?, ?, ?, ?, 0, 1, ?)
            "#,
        )
        .bind(name)
        .bind(api_key_prefix)
        .bind(api_key_hash)
        .bind(quota_tokens)
        .bind(clock::now())
        .execute(pool)
        .await
        .map_err(|e| DbError::on_conflict(e, format!("user '{}' already exists", name)))?;

        let id = result.last_insert_rowid();
        info!("Created user {} (id {})", name, id);

        Self::get(pool, id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("user {}", id)))
    }

    /// Get a user by id.
    pub async fn get(pool: &SqlitePool, id: i64) -> DbResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// Look up a user and key digest by key prefix (data-plane auth path).
    pub async fn get_by_prefix(pool: &SqlitePool, prefix: &str) -> DbResult<Option<UserWithHash>> {
        let row = sqlx::query_as::<_, UserWithHashRow>(&format!(
            "SELECT {USER_COLUMNS}, api_key_hash FROM users WHERE api_key_prefix = ?"
        ))
        .bind(prefix)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|r| UserWithHash {
            api_key_hash: r.api_key_hash,
            user: r.row.into(),
        }))
    }

    /// List users, paginated. Returns the page and the total count.
    pub async fn list(pool: &SqlitePool, page: u32, limit: u32) -> DbResult<(Vec<User>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await?;

        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok((rows.into_iter().map(Into::into).collect(), total))
    }

    /// Apply a partial update. Returns the updated row, or `None` if the
    /// user does not exist. An empty update is a no-op read.
    pub async fn update(pool: &SqlitePool, id: i64, update: UserUpdate) -> DbResult<Option<User>> {
        if update.name.is_none() && update.quota_tokens.is_none() && update.enabled.is_none() {
            return Self::get(pool, id).await;
        }

        let mut qb = sqlx::QueryBuilder::new("UPDATE users SET ");
        let mut assignments = qb.separated(", ");
        if let Some(name) = &update.name {
            assignments.push("name = ");
            assignments.push_bind_unseparated(name.clone());
        }
        if let Some(quota) = update.quota_tokens {
            assignments.push("quota_tokens = ");
            assignments.push_bind_unseparated(quota);
        }
        if let Some(enabled) = update.enabled {
            assignments.push("enabled = ");
            assignments.push_bind_unseparated(enabled as i64);
        }
        qb.push(" WHERE id = ").push_bind(id);

        let result = qb
            .build()
            .execute(pool)
            .await
            .map_err(|e| DbError::on_conflict(e, "user name already taken".to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Self::get(pool, id).await
    }

    /// Hard-delete a user. Usage logs cascade.
    pub async fn delete(pool: &SqlitePool, id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted user {}", id);
        }
        Ok(deleted)
    }

    /// Atomically replace the key digest and prefix. The old key stops
    /// authenticating as of the commit; counters are untouched.
    pub async fn replace_key(
        pool: &SqlitePool,
        id: i64,
        api_key_prefix: &str,
        api_key_hash: &str,
    ) -> DbResult<Option<User>> {
        let result = sqlx::query("UPDATE users SET api_key_prefix = ?, api_key_hash = ? WHERE id = ?")
            .bind(api_key_prefix)
            .bind(api_key_hash)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| DbError::on_conflict(e, "key prefix already in use".to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        info!("Regenerated API key for user {}", id);
        Self::get(pool, id).await
    }

    /// Zero the used-token counter, returning the previous value for audit.
    pub async fn reset_used_tokens(pool: &SqlitePool, id: i64) -> DbResult<Option<i64>> {
        let mut tx = pool.begin().await?;

        let previous: Option<i64> = sqlx::query_scalar("SELECT used_tokens FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(previous) = previous else {
            return Ok(None);
        };

        sqlx::query("UPDATE users SET used_tokens = 0 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(previous))
    }
}

/// Internal row type for SQLx mapping
#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    api_key_prefix: String,
    quota_tokens: Option<i64>,
    used_tokens: i64,
    enabled: i64,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            name: row.name,
            api_key_prefix: row.api_key_prefix,
            quota_tokens: row.quota_tokens,
            used_tokens: row.used_tokens,
            enabled: row.enabled != 0,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserWithHashRow {
    #[sqlx(flatten)]
    row: UserRow,
    api_key_hash: String,
}
