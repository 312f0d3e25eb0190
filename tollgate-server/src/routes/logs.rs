//! Request log endpoints for the admin UI.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};

use tollgate_db::{LogEntry, LogFilter, UsageRepository, UsageStatus};

use crate::error::ApiError;
use crate::middleware::AdminSession;
use crate::state::AppState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub user_id: Option<i64>,
    pub provider: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let status = match query.status.as_deref() {
        Some(raw) => Some(raw.parse::<UsageStatus>().map_err(|_| {
            ApiError::Validation("status must be success or error".to_string())
        })?),
        None => None,
    };

    let filter = LogFilter {
        user_id: query.user_id,
        provider: query.provider,
        status,
    };

    let (logs, total) = UsageRepository::logs(state.db.pool(), limit, offset, &filter).await?;

    Ok(Json(LogsResponse {
        logs,
        total,
        limit,
        offset,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list))
}
