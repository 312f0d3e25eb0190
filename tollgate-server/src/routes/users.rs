//! End-user management endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Deserializer, Serialize};

use tollgate_core::crypto;
use tollgate_db::{User, UserRepository, UserUpdate};

use crate::error::{ApiError, ApiJson};
use crate::middleware::AdminSession;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

/// Validate a user name: the API-key prefix is `sk-<name>` and the
/// bearer parser splits at the second hyphen, so hyphens (and anything
/// else outside `[A-Za-z0-9_]`) are rejected.
fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() || name.len() > 64 {
        return Err(ApiError::Validation(
            "Name must be between 1 and 64 characters".to_string(),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ApiError::Validation(
            "Name may only contain letters, digits, and underscores".to_string(),
        ));
    }
    Ok(())
}

fn validate_quota(quota: Option<i64>) -> Result<(), ApiError> {
    if let Some(quota) = quota {
        if quota < 0 {
            return Err(ApiError::Validation(
                "quota_tokens must be non-negative".to_string(),
            ));
        }
    }
    Ok(())
}

/// Present fields deserialize to `Some(inner)`; absent fields stay
/// `None`. Lets `"quota_tokens": null` clear a quota.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub users: Vec<User>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub name: String,
    pub quota_tokens: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub user: User,
    /// The plaintext key; this is the only time it is ever returned
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub quota_tokens: Option<Option<i64>>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetUsageResponse {
    pub success: bool,
    pub previous_used_tokens: i64,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let (users, total) = UserRepository::list(state.db.pool(), page, limit).await?;
    Ok(Json(ListResponse {
        users,
        total,
        page,
        limit,
    }))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    ApiJson(payload): ApiJson<CreateRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    validate_name(&payload.name)?;
    validate_quota(payload.quota_tokens)?;

    let key = crypto::generate_api_key(&payload.name)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let user = UserRepository::create(
        state.db.pool(),
        &payload.name,
        payload.quota_tokens,
        &key.prefix,
        &key.hash,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            user,
            api_key: key.full_key,
        }),
    ))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    let user = UserRepository::get(state.db.pool(), id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;
    Ok(Json(user))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<UpdateRequest>,
) -> Result<Json<User>, ApiError> {
    if let Some(name) = &payload.name {
        validate_name(name)?;
    }
    if let Some(quota) = payload.quota_tokens {
        validate_quota(quota)?;
    }

    let user = UserRepository::update(
        state.db.pool(),
        id,
        UserUpdate {
            name: payload.name,
            quota_tokens: payload.quota_tokens,
            enabled: payload.enabled,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    Ok(Json(user))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let deleted = UserRepository::delete(state.db.pool(), id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("User {} not found", id)));
    }
    Ok(Json(DeletedResponse { success: true }))
}

pub async fn regenerate_key(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let user = UserRepository::get(state.db.pool(), id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    let key = crypto::generate_api_key(&user.name).map_err(|e| ApiError::Internal(e.to_string()))?;

    let user = UserRepository::replace_key(state.db.pool(), id, &key.prefix, &key.hash)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    Ok(Json(CreatedResponse {
        user,
        api_key: key.full_key,
    }))
}

pub async fn reset_usage(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> Result<Json<ResetUsageResponse>, ApiError> {
    let previous = UserRepository::reset_used_tokens(state.db.pool(), id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    Ok(Json(ResetUsageResponse {
        success: true,
        previous_used_tokens: previous,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", get(get_user).put(update).delete(delete))
        .route("/{id}/regenerate-key", post(regenerate_key))
        .route("/{id}/reset-usage", post(reset_usage))
}
