//! Background jobs: expiry sweeps, the nightly usage rollup, and log
//! retention.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tracing::{error, info};

use tollgate_db::{
    DbResult, OAuthStateRepository, SessionRepository, TollgateDb, UsageRepository,
};

use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(600);
const ROLLUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Roll up the prior day and prune logs past the retention horizon.
pub async fn run_rollup(db: &TollgateDb, retention_days: u32) -> DbResult<()> {
    let pool = db.pool();
    let yesterday = Utc::now().date_naive() - TimeDelta::days(1);

    UsageRepository::rollup_day(pool, yesterday).await?;

    let cutoff = Utc::now() - TimeDelta::days(i64::from(retention_days));
    UsageRepository::prune_before(pool, cutoff).await?;

    Ok(())
}

/// Spawn the recurring background loops.
pub fn spawn_background_jobs(state: Arc<AppState>) {
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let pool = sweep_state.db.pool();
            if let Err(e) = SessionRepository::sweep_expired(pool).await {
                error!("Session sweep failed: {}", e);
            }
            if let Err(e) = OAuthStateRepository::sweep_expired(pool).await {
                error!("OAuth state sweep failed: {}", e);
            }
        }
    });

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ROLLUP_INTERVAL);
        loop {
            tick.tick().await;
            let retention = match state.settings.get(state.db.pool()).await {
                Ok(config) => config.usage_retention_days,
                Err(e) => {
                    error!("Failed to load config for rollup: {}", e);
                    continue;
                }
            };
            match run_rollup(&state.db, retention).await {
                Ok(()) => info!("Daily usage rollup completed"),
                Err(e) => error!("Daily usage rollup failed: {}", e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_db::{
        LogFilter, UsageRecord, UsageStatus, UserRepository, test_helpers::create_test_db,
    };

    #[tokio::test]
    async fn test_run_rollup_compacts_and_prunes() {
        let db = create_test_db().await.unwrap();
        let pool = db.pool();

        let user = UserRepository::create(pool, "alice", None, "sk-alice", "$argon2id$fake")
            .await
            .unwrap();
        UsageRepository::record(
            pool,
            &UsageRecord {
                user_id: user.id,
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                tokens_input: 10,
                tokens_output: 2,
                duration_ms: 5,
                status: UsageStatus::Success,
                error: None,
            },
        )
        .await
        .unwrap();

        // Backdate the row to yesterday so the rollup picks it up
        let yesterday = Utc::now().date_naive() - TimeDelta::days(1);
        sqlx::query("UPDATE usage_logs SET created_at = ?")
            .bind(format!("{}T12:00:00.000000Z", yesterday))
            .execute(pool)
            .await
            .unwrap();

        run_rollup(&db, 90).await.unwrap();

        let daily = UsageRepository::daily(pool, 2, None, None).await.unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].tokens_input, 10);

        // Within retention, the raw log survives
        let (_, total) = UsageRepository::logs(pool, 10, 0, &LogFilter::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
    }
}
