//! Single-use state nonces for the OAuth authorization flow.

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::clock;
use crate::error::DbResult;

/// Default time-to-live for a state nonce, in minutes.
pub const STATE_TTL_MINUTES: i64 = 10;

/// A pending OAuth flow, keyed by its state nonce and tied to the admin
/// session that started it.
#[derive(Debug, Clone)]
pub struct OAuthState {
    pub state: String,
    pub provider: String,
    pub admin_session_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Repository for oauth_states table operations
pub struct OAuthStateRepository;

impl OAuthStateRepository {
    /// Persist a fresh state nonce for `provider`, owned by the given
    /// admin session. Returns the nonce.
    pub async fn create(
        pool: &SqlitePool,
        provider: &str,
        admin_session_id: &str,
    ) -> DbResult<String> {
        let state = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO oauth_states (state, provider, admin_session_id, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&state)
        .bind(provider)
        .bind(admin_session_id)
        .bind(clock::text(now))
        .bind(clock::text(now + TimeDelta::minutes(STATE_TTL_MINUTES)))
        .execute(pool)
        .await?;

        Ok(state)
    }

    /// Consume (retrieve and delete) a state nonce.
    ///
    /// Returns `None` for unknown or expired states; either way the row
    /// cannot be used a second time.
    pub async fn consume(pool: &SqlitePool, state: &str) -> DbResult<Option<OAuthState>> {
        let mut tx = pool.begin().await?;

        let row = sqlx::query_as::<_, OAuthStateRow>(
            "SELECT state, provider, admin_session_id, created_at, expires_at
             FROM oauth_states WHERE state = ? AND expires_at > ?",
        )
        .bind(state)
        .bind(clock::now())
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM oauth_states WHERE state = ?")
            .bind(state)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.map(Into::into))
    }

    /// Remove expired states. Returns the number deleted.
    pub async fn sweep_expired(pool: &SqlitePool) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at <= ?")
            .bind(clock::now())
            .execute(pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!("Swept {} expired OAuth states", deleted);
        }
        Ok(deleted)
    }
}

#[derive(sqlx::FromRow)]
struct OAuthStateRow {
    state: String,
    provider: String,
    admin_session_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<OAuthStateRow> for OAuthState {
    fn from(row: OAuthStateRow) -> Self {
        OAuthState {
            state: row.state,
            provider: row.provider,
            admin_session_id: row.admin_session_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}
