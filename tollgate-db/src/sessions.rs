//! Admin login sessions.
//!
//! Sessions slide forward on each authenticated request, up to a hard
//! cap measured from creation. A background sweep removes expired rows.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::clock;
use crate::error::DbResult;

/// Sliding window: each admin request pushes expiry this far out.
pub const SESSION_TTL_HOURS: i64 = 24;
/// Hard cap: a session never lives longer than this from creation.
pub const SESSION_CAP_DAYS: i64 = 7;

/// Admin login session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Repository for session table operations
pub struct SessionRepository;

impl SessionRepository {
    /// Insert a session issued by a successful password check.
    pub async fn create(pool: &SqlitePool, id: &str, csrf_token: &str) -> DbResult<Session> {
        let now = Utc::now();
        let expires_at = now + TimeDelta::hours(SESSION_TTL_HOURS);

        sqlx::query(
            r#"
            INSERT INTO sessions (id, csrf_token, expires_at, created_at, last_accessed)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(csrf_token)
        .bind(clock::text(expires_at))
        .bind(clock::text(now))
        .bind(clock::text(now))
        .execute(pool)
        .await?;

        Ok(Session {
            id: id.to_string(),
            csrf_token: csrf_token.to_string(),
            expires_at,
            created_at: now,
            last_accessed: now,
        })
    }

    /// Fetch a session if it has not expired.
    pub async fn get_live(pool: &SqlitePool, id: &str) -> DbResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, csrf_token, expires_at, created_at, last_accessed
             FROM sessions WHERE id = ? AND expires_at > ?",
        )
        .bind(id)
        .bind(clock::now())
        .fetch_optional(pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// Slide the expiry window forward, capped at creation + hard cap.
    pub async fn touch(pool: &SqlitePool, session: &Session) -> DbResult<()> {
        let now = Utc::now();
        let slid = now + TimeDelta::hours(SESSION_TTL_HOURS);
        let cap = session.created_at + TimeDelta::days(SESSION_CAP_DAYS);
        let expires_at = slid.min(cap);

        sqlx::query("UPDATE sessions SET expires_at = ?, last_accessed = ? WHERE id = ?")
            .bind(clock::text(expires_at))
            .bind(clock::text(now))
            .bind(&session.id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Delete a session (logout).
    pub async fn delete(pool: &SqlitePool, id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Remove all expired sessions. Returns the number deleted.
    pub async fn sweep_expired(pool: &SqlitePool) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(clock::now())
            .execute(pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!("Swept {} expired sessions", deleted);
        }
        Ok(deleted)
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    csrf_token: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            csrf_token: row.csrf_token,
            expires_at: row.expires_at,
            created_at: row.created_at,
            last_accessed: row.last_accessed,
        }
    }
}
