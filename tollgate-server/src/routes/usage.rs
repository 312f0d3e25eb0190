//! Usage reporting endpoints for the admin UI.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};

use tollgate_db::{DailyUsage, Period, ProviderUsage, UsageRepository, UsageStats, UserRepository};

use crate::error::ApiError;
use crate::middleware::AdminSession;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub days: Option<u32>,
    pub user_id: Option<i64>,
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub period: String,
    pub totals: UsageStats,
    pub by_provider: Vec<ProviderUsage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUsageResponse {
    pub user_id: i64,
    pub period: String,
    pub totals: UsageStats,
}

#[derive(Debug, Serialize)]
pub struct DailyResponse {
    pub days: u32,
    pub entries: Vec<DailyUsage>,
}

fn parse_period(raw: Option<String>) -> Result<(Period, String), ApiError> {
    let raw = raw.unwrap_or_else(|| "all".to_string());
    let period = raw
        .parse::<Period>()
        .map_err(|_| ApiError::Validation("period must be today, week, month, or all".to_string()))?;
    Ok((period, raw))
}

pub async fn summary(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let (period, label) = parse_period(query.period)?;
    let pool = state.db.pool();

    let totals = UsageRepository::stats(pool, period, None).await?;
    let by_provider = UsageRepository::stats_by_provider(pool, period).await?;

    Ok(Json(SummaryResponse {
        period: label,
        totals,
        by_provider,
    }))
}

pub async fn user_usage(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<UserUsageResponse>, ApiError> {
    let (period, label) = parse_period(query.period)?;
    let pool = state.db.pool();

    UserRepository::get(pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    let totals = UsageRepository::stats(pool, period, Some(id)).await?;

    Ok(Json(UserUsageResponse {
        user_id: id,
        period: label,
        totals,
    }))
}

pub async fn daily(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Query(query): Query<DailyQuery>,
) -> Result<Json<DailyResponse>, ApiError> {
    let days = query.days.unwrap_or(30).clamp(1, 365);

    let entries = UsageRepository::daily(
        state.db.pool(),
        days,
        query.user_id,
        query.provider.as_deref(),
    )
    .await?;

    Ok(Json(DailyResponse { days, entries }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(summary))
        .route("/users/{id}", get(user_usage))
        .route("/daily", get(daily))
}
