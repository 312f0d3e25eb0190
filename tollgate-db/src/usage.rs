//! Usage logs, counters, and daily rollups.
//!
//! Each forwarded request produces one `usage_logs` row; the matching
//! `used_tokens` increment commits in the same transaction, so an
//! observer never sees accounting drift. The nightly rollup compacts
//! per-request rows into `daily_usage` grains that survive log
//! retention.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::clock;
use crate::error::DbResult;

/// Outcome of a forwarded request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Success,
    Error,
}

impl std::fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageStatus::Success => write!(f, "success"),
            UsageStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for UsageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(UsageStatus::Success),
            "error" => Ok(UsageStatus::Error),
            _ => Err(format!("Unknown usage status: {}", s)),
        }
    }
}

/// Reporting window for aggregate queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Week,
    Month,
    All,
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Period::Today),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "all" => Ok(Period::All),
            _ => Err(format!("Unknown period: {}", s)),
        }
    }
}

impl Period {
    /// Earliest rollup date included in this window, if bounded.
    fn from_date(self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            Period::Today => Some(today),
            Period::Week => Some(today - TimeDelta::days(7)),
            Period::Month => Some(today - TimeDelta::days(30)),
            Period::All => None,
        }
    }
}

/// Input for one accounting row
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub user_id: i64,
    pub provider: String,
    pub model: String,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub duration_ms: i64,
    pub status: UsageStatus,
    pub error: Option<String>,
}

/// Aggregate totals for a window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_requests: i64,
    pub total_tokens_input: i64,
    pub total_tokens_output: i64,
}

/// Aggregate totals per provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUsage {
    pub provider: String,
    pub requests: i64,
    pub tokens_input: i64,
    pub tokens_output: i64,
}

/// One pre-aggregated day at some grain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: String,
    pub user_id: Option<i64>,
    pub provider: Option<String>,
    pub requests: i64,
    pub tokens_input: i64,
    pub tokens_output: i64,
}

/// One request log row as served to the admin log view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub user_id: i64,
    pub user_name: String,
    pub provider: String,
    pub model: String,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub duration_ms: i64,
    pub status: UsageStatus,
    pub error: Option<String>,
}

/// Filters for the admin log view
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub user_id: Option<i64>,
    pub provider: Option<String>,
    pub status: Option<UsageStatus>,
}

fn today_start_text() -> String {
    clock::text(
        Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc(),
    )
}

/// Repository for usage accounting operations
pub struct UsageRepository;

impl UsageRepository {
    /// Append a usage row and bump the user's counter in one transaction.
    pub async fn record(pool: &SqlitePool, record: &UsageRecord) -> DbResult<()> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO usage_logs (user_id, provider, model, tokens_input, tokens_output, duration_ms, status, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.user_id)
        .bind(&record.provider)
        .bind(&record.model)
        .bind(record.tokens_input)
        .bind(record.tokens_output)
        .bind(record.duration_ms)
        .bind(record.status.to_string())
        .bind(&record.error)
        .bind(clock::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE users SET used_tokens = used_tokens + ?, last_used_at = ? WHERE id = ?",
        )
        .bind(record.tokens_input + record.tokens_output)
        .bind(clock::now())
        .bind(record.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            user_id = record.user_id,
            tokens_in = record.tokens_input,
            tokens_out = record.tokens_output,
            "Recorded usage"
        );
        Ok(())
    }

    /// Aggregate totals over a window, optionally for a single user.
    ///
    /// Closed days come from `daily_usage`; today is aggregated live from
    /// `usage_logs`.
    pub async fn stats(
        pool: &SqlitePool,
        period: Period,
        user_id: Option<i64>,
    ) -> DbResult<UsageStats> {
        let today = Utc::now().date_naive();
        let mut stats = UsageStats::default();

        if period != Period::Today {
            let mut qb = sqlx::QueryBuilder::new(
                "SELECT COALESCE(SUM(requests), 0) AS total_requests,
                        COALESCE(SUM(tokens_input), 0) AS total_tokens_input,
                        COALESCE(SUM(tokens_output), 0) AS total_tokens_output
                 FROM daily_usage WHERE provider IS NULL AND user_id IS ",
            );
            qb.push_bind(user_id);
            qb.push(" AND date < ").push_bind(today.to_string());
            if let Some(from) = period.from_date(today) {
                qb.push(" AND date >= ").push_bind(from.to_string());
            }

            let closed: StatsRow = qb.build_query_as().fetch_one(pool).await?;
            stats.total_requests += closed.total_requests;
            stats.total_tokens_input += closed.total_tokens_input;
            stats.total_tokens_output += closed.total_tokens_output;
        }

        let mut qb = sqlx::QueryBuilder::new(
            "SELECT COUNT(*) AS total_requests,
                    COALESCE(SUM(tokens_input), 0) AS total_tokens_input,
                    COALESCE(SUM(tokens_output), 0) AS total_tokens_output
             FROM usage_logs WHERE created_at >= ",
        );
        qb.push_bind(today_start_text());
        if let Some(uid) = user_id {
            qb.push(" AND user_id = ").push_bind(uid);
        }

        let live: StatsRow = qb.build_query_as().fetch_one(pool).await?;
        stats.total_requests += live.total_requests;
        stats.total_tokens_input += live.total_tokens_input;
        stats.total_tokens_output += live.total_tokens_output;

        Ok(stats)
    }

    /// Per-provider totals over a window.
    pub async fn stats_by_provider(
        pool: &SqlitePool,
        period: Period,
    ) -> DbResult<Vec<ProviderUsage>> {
        let today = Utc::now().date_naive();
        let mut merged: BTreeMap<String, ProviderUsage> = BTreeMap::new();

        if period != Period::Today {
            let mut qb = sqlx::QueryBuilder::new(
                "SELECT provider, COALESCE(SUM(requests), 0) AS requests,
                        COALESCE(SUM(tokens_input), 0) AS tokens_input,
                        COALESCE(SUM(tokens_output), 0) AS tokens_output
                 FROM daily_usage
                 WHERE user_id IS NULL AND provider IS NOT NULL AND date < ",
            );
            qb.push_bind(today.to_string());
            if let Some(from) = period.from_date(today) {
                qb.push(" AND date >= ").push_bind(from.to_string());
            }
            qb.push(" GROUP BY provider");

            let rows: Vec<ProviderRow> = qb.build_query_as().fetch_all(pool).await?;
            for row in rows {
                merge_provider(&mut merged, row);
            }
        }

        let rows: Vec<ProviderRow> = sqlx::query_as(
            "SELECT provider, COUNT(*) AS requests,
                    COALESCE(SUM(tokens_input), 0) AS tokens_input,
                    COALESCE(SUM(tokens_output), 0) AS tokens_output
             FROM usage_logs WHERE created_at >= ? GROUP BY provider",
        )
        .bind(today_start_text())
        .fetch_all(pool)
        .await?;
        for row in rows {
            merge_provider(&mut merged, row);
        }

        Ok(merged.into_values().collect())
    }

    /// Rolled-up days for the last `days` days at the grain selected by
    /// the filters, with a live row for today.
    pub async fn daily(
        pool: &SqlitePool,
        days: u32,
        user_id: Option<i64>,
        provider: Option<&str>,
    ) -> DbResult<Vec<DailyUsage>> {
        let today = Utc::now().date_naive();
        let from = today - TimeDelta::days(i64::from(days.saturating_sub(1)));

        let mut results = Vec::new();

        // Live aggregate for today; the rollup only covers closed days.
        let mut qb = sqlx::QueryBuilder::new(
            "SELECT COUNT(*) AS total_requests,
                    COALESCE(SUM(tokens_input), 0) AS total_tokens_input,
                    COALESCE(SUM(tokens_output), 0) AS total_tokens_output
             FROM usage_logs WHERE created_at >= ",
        );
        qb.push_bind(today_start_text());
        if let Some(uid) = user_id {
            qb.push(" AND user_id = ").push_bind(uid);
        }
        if let Some(p) = provider {
            qb.push(" AND provider = ").push_bind(p.to_string());
        }
        let live: StatsRow = qb.build_query_as().fetch_one(pool).await?;
        if live.total_requests > 0 {
            results.push(DailyUsage {
                date: today.to_string(),
                user_id,
                provider: provider.map(str::to_string),
                requests: live.total_requests,
                tokens_input: live.total_tokens_input,
                tokens_output: live.total_tokens_output,
            });
        }

        let mut qb = sqlx::QueryBuilder::new(
            "SELECT date, user_id, provider, requests, tokens_input, tokens_output
             FROM daily_usage WHERE user_id IS ",
        );
        qb.push_bind(user_id);
        qb.push(" AND provider IS ").push_bind(provider.map(str::to_string));
        qb.push(" AND date >= ").push_bind(from.to_string());
        qb.push(" AND date < ").push_bind(today.to_string());
        qb.push(" ORDER BY date DESC");

        let rows: Vec<DailyRow> = qb.build_query_as().fetch_all(pool).await?;
        results.extend(rows.into_iter().map(Into::into));

        Ok(results)
    }

    /// Paginated request logs with optional filters, newest first.
    pub async fn logs(
        pool: &SqlitePool,
        limit: u32,
        offset: u32,
        filter: &LogFilter,
    ) -> DbResult<(Vec<LogEntry>, i64)> {
        fn apply_filter(qb: &mut sqlx::QueryBuilder<'_, sqlx::Sqlite>, filter: &LogFilter) {
            if let Some(uid) = filter.user_id {
                qb.push(" AND ul.user_id = ").push_bind(uid);
            }
            if let Some(provider) = &filter.provider {
                qb.push(" AND ul.provider = ").push_bind(provider.clone());
            }
            if let Some(status) = filter.status {
                qb.push(" AND ul.status = ").push_bind(status.to_string());
            }
        }

        let mut count_qb =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM usage_logs ul WHERE 1 = 1");
        apply_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

        let mut qb = sqlx::QueryBuilder::new(
            "SELECT ul.id, ul.created_at, ul.user_id, COALESCE(u.name, 'unknown') AS user_name,
                    ul.provider, ul.model, ul.tokens_input, ul.tokens_output, ul.duration_ms,
                    ul.status, ul.error
             FROM usage_logs ul
             LEFT JOIN users u ON ul.user_id = u.id
             WHERE 1 = 1",
        );
        apply_filter(&mut qb, filter);
        qb.push(" ORDER BY ul.id DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(i64::from(offset));

        let rows: Vec<LogRow> = qb.build_query_as().fetch_all(pool).await?;
        Ok((rows.into_iter().map(Into::into).collect(), total))
    }

    /// Regenerate the DailyUsage grains for one date.
    ///
    /// Delete-then-insert inside a single transaction makes repeated runs
    /// for the same date idempotent.
    pub async fn rollup_day(pool: &SqlitePool, date: NaiveDate) -> DbResult<()> {
        let day = date.to_string();
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM daily_usage WHERE date = ?")
            .bind(&day)
            .execute(&mut *tx)
            .await?;

        // Finest grain: (user, provider)
        sqlx::query(
            "INSERT INTO daily_usage (date, user_id, provider, requests, tokens_input, tokens_output)
             SELECT ?, user_id, provider, COUNT(*), COALESCE(SUM(tokens_input), 0), COALESCE(SUM(tokens_output), 0)
             FROM usage_logs WHERE date(created_at) = ?
             GROUP BY user_id, provider",
        )
        .bind(&day)
        .bind(&day)
        .execute(&mut *tx)
        .await?;

        // Per-user grain
        sqlx::query(
            "INSERT INTO daily_usage (date, user_id, provider, requests, tokens_input, tokens_output)
             SELECT ?, user_id, NULL, COUNT(*), COALESCE(SUM(tokens_input), 0), COALESCE(SUM(tokens_output), 0)
             FROM usage_logs WHERE date(created_at) = ?
             GROUP BY user_id",
        )
        .bind(&day)
        .bind(&day)
        .execute(&mut *tx)
        .await?;

        // Per-provider grain
        sqlx::query(
            "INSERT INTO daily_usage (date, user_id, provider, requests, tokens_input, tokens_output)
             SELECT ?, NULL, provider, COUNT(*), COALESCE(SUM(tokens_input), 0), COALESCE(SUM(tokens_output), 0)
             FROM usage_logs WHERE date(created_at) = ?
             GROUP BY provider",
        )
        .bind(&day)
        .bind(&day)
        .execute(&mut *tx)
        .await?;

        // Grand total
        sqlx::query(
            "INSERT INTO daily_usage (date, user_id, provider, requests, tokens_input, tokens_output)
             SELECT ?, NULL, NULL, COUNT(*), COALESCE(SUM(tokens_input), 0), COALESCE(SUM(tokens_output), 0)
             FROM usage_logs WHERE date(created_at) = ?
             GROUP BY 1",
        )
        .bind(&day)
        .bind(&day)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("Rolled up usage for {}", day);
        Ok(())
    }

    /// Delete usage logs older than the retention cutoff. Aggregates in
    /// `daily_usage` survive.
    pub async fn prune_before(pool: &SqlitePool, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM usage_logs WHERE created_at < ?")
            .bind(clock::text(cutoff))
            .execute(pool)
            .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            info!("Pruned {} usage logs past retention", pruned);
        }
        Ok(pruned)
    }
}

fn merge_provider(merged: &mut BTreeMap<String, ProviderUsage>, row: ProviderRow) {
    let entry = merged
        .entry(row.provider.clone())
        .or_insert_with(|| ProviderUsage {
            provider: row.provider,
            requests: 0,
            tokens_input: 0,
            tokens_output: 0,
        });
    entry.requests += row.requests;
    entry.tokens_input += row.tokens_input;
    entry.tokens_output += row.tokens_output;
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total_requests: i64,
    total_tokens_input: i64,
    total_tokens_output: i64,
}

#[derive(sqlx::FromRow)]
struct ProviderRow {
    provider: String,
    requests: i64,
    tokens_input: i64,
    tokens_output: i64,
}

#[derive(sqlx::FromRow)]
struct DailyRow {
    date: String,
    user_id: Option<i64>,
    provider: Option<String>,
    requests: i64,
    tokens_input: i64,
    tokens_output: i64,
}

impl From<DailyRow> for DailyUsage {
    fn from(row: DailyRow) -> Self {
        DailyUsage {
            date: row.date,
            user_id: row.user_id,
            provider: row.provider,
            requests: row.requests,
            tokens_input: row.tokens_input,
            tokens_output: row.tokens_output,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    created_at: DateTime<Utc>,
    user_id: i64,
    user_name: String,
    provider: String,
    model: String,
    tokens_input: i64,
    tokens_output: i64,
    duration_ms: i64,
    status: String,
    error: Option<String>,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            id: row.id,
            created_at: row.created_at,
            user_id: row.user_id,
            user_name: row.user_name,
            provider: row.provider,
            model: row.model,
            tokens_input: row.tokens_input,
            tokens_output: row.tokens_output,
            duration_ms: row.duration_ms,
            status: row.status.parse().unwrap_or(UsageStatus::Error),
            error: row.error,
        }
    }
}
