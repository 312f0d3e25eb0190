//! Provider management endpoints.
//!
//! Every mutation commits to the store first, then asks the supervisor
//! to reload; the supervisor never calls back into this layer.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use tollgate_db::{
    AccountRepository, Provider, ProviderAccount, ProviderKind, ProviderRepository,
};

use crate::error::{ApiError, ApiJson};
use crate::middleware::AdminSession;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub name: String,
    pub kind: ProviderKind,
    pub enabled: bool,
    pub accounts_count: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub providers: Vec<ProviderSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDetails {
    pub name: String,
    pub kind: ProviderKind,
    pub enabled: bool,
    pub settings: serde_json::Value,
    pub accounts: Vec<ProviderAccount>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub settings: serde_json::Value,
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub name: String,
    pub status: String,
    pub accounts_count: i64,
    pub last_error: Option<String>,
}

fn provider_status(provider: &Provider, accounts_count: i64) -> &'static str {
    if !provider.enabled {
        "inactive"
    } else if accounts_count > 0 {
        "active"
    } else {
        "no_accounts"
    }
}

fn summarize(provider: Provider, accounts_count: i64) -> ProviderSummary {
    let status = provider_status(&provider, accounts_count).to_string();
    ProviderSummary {
        name: provider.name,
        kind: provider.kind,
        enabled: provider.enabled,
        accounts_count,
        status,
        created_at: provider.created_at,
        updated_at: provider.updated_at,
    }
}

/// Validate the closed provider settings schema.
fn validate_settings(settings: &serde_json::Value) -> Result<(), ApiError> {
    let Some(object) = settings.as_object() else {
        return Err(ApiError::Validation("settings must be an object".to_string()));
    };

    for (key, value) in object {
        match key.as_str() {
            "load_balancing" => {
                let valid = matches!(value.as_str(), Some("round_robin") | Some("least_used"));
                if !valid {
                    return Err(ApiError::Validation(
                        "load_balancing must be round_robin or least_used".to_string(),
                    ));
                }
            }
            "timeout_seconds" | "request_retry" => {
                if value.as_u64().is_none() {
                    return Err(ApiError::Validation(format!(
                        "{} must be a non-negative integer",
                        key
                    )));
                }
            }
            other => {
                return Err(ApiError::Validation(format!(
                    "Unknown settings key: {}",
                    other
                )));
            }
        }
    }

    Ok(())
}

async fn reload_sidecar(state: &AppState) {
    // The store mutation already committed; a reload failure is an
    // operational condition surfaced via proxy status, not a reason to
    // fail the admin request.
    if let Err(e) = state.supervisor.reload().await {
        warn!("Sidecar reload after provider change failed: {}", e);
    }
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> Result<Json<ListResponse>, ApiError> {
    let pool = state.db.pool();
    let providers = ProviderRepository::list(pool).await?;

    let mut summaries = Vec::with_capacity(providers.len());
    for provider in providers {
        let count = AccountRepository::count_for_provider(pool, provider.id).await?;
        summaries.push(summarize(provider, count));
    }

    let total = summaries.len();
    Ok(Json(ListResponse {
        providers: summaries,
        total,
    }))
}

pub async fn get_provider(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(name): Path<String>,
) -> Result<Json<ProviderDetails>, ApiError> {
    let pool = state.db.pool();
    let provider = ProviderRepository::get_by_name(pool, &name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}' not found", name)))?;

    let accounts = AccountRepository::list_for_provider(pool, provider.id).await?;

    Ok(Json(ProviderDetails {
        name: provider.name,
        kind: provider.kind,
        enabled: provider.enabled,
        settings: provider.settings,
        accounts,
        created_at: provider.created_at,
        updated_at: provider.updated_at,
    }))
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(name): Path<String>,
    ApiJson(payload): ApiJson<UpdateSettingsRequest>,
) -> Result<Json<ProviderSummary>, ApiError> {
    validate_settings(&payload.settings)?;
    let pool = state.db.pool();

    let provider = ProviderRepository::update_settings(pool, &name, &payload.settings)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}' not found", name)))?;

    if let Some(enabled) = payload.enabled {
        ProviderRepository::set_enabled(pool, &name, enabled).await?;
    }

    let provider = ProviderRepository::get_by_name(pool, &name)
        .await?
        .unwrap_or(provider);
    let count = AccountRepository::count_for_provider(pool, provider.id).await?;

    reload_sidecar(&state).await;
    Ok(Json(summarize(provider, count)))
}

pub async fn delete_provider(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let deleted = ProviderRepository::delete(state.db.pool(), &name).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Provider '{}' not found", name)));
    }

    reload_sidecar(&state).await;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path((name, account_id)): Path<(String, i64)>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let pool = state.db.pool();
    let provider = ProviderRepository::get_by_name(pool, &name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}' not found", name)))?;

    let deleted = AccountRepository::delete(pool, provider.id, account_id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!(
            "Account {} not found for provider '{}'",
            account_id, name
        )));
    }

    reload_sidecar(&state).await;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn health(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(name): Path<String>,
) -> Result<Json<ProviderHealth>, ApiError> {
    let pool = state.db.pool();
    let provider = ProviderRepository::get_by_name(pool, &name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}' not found", name)))?;

    let accounts_count = AccountRepository::count_for_provider(pool, provider.id).await?;

    // A sidecar that cannot be probed is an annotation, not a failure
    let health = match state.supervisor.management().provider_status(&name).await {
        Ok(status) => ProviderHealth {
            name: status.name,
            status: status.status,
            accounts_count,
            last_error: status.last_error,
        },
        Err(e) => ProviderHealth {
            name: provider.name,
            status: "unreachable".to_string(),
            accounts_count,
            last_error: Some(e.to_string()),
        },
    };

    Ok(Json(health))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list))
        .route("/{name}", get(get_provider).delete(delete_provider))
        .route("/{name}/settings", put(update_settings))
        .route("/{name}/accounts/{id}", delete(delete_account))
        .route("/{name}/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_settings_closed_schema() {
        assert!(validate_settings(&serde_json::json!({})).is_ok());
        assert!(validate_settings(&serde_json::json!({
            "load_balancing": "round_robin",
            "timeout_seconds": 90,
            "request_retry": 2
        }))
        .is_ok());

        assert!(validate_settings(&serde_json::json!({"load_balancing": "random"})).is_err());
        assert!(validate_settings(&serde_json::json!({"timeout_seconds": -5})).is_err());
        assert!(validate_settings(&serde_json::json!({"surprise": true})).is_err());
        assert!(validate_settings(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_provider_status_labels() {
        let provider = Provider {
            id: 1,
            name: "claude".to_string(),
            kind: ProviderKind::Oauth,
            enabled: true,
            settings: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(provider_status(&provider, 2), "active");
        assert_eq!(provider_status(&provider, 0), "no_accounts");

        let disabled = Provider {
            enabled: false,
            ..provider
        };
        assert_eq!(provider_status(&disabled, 2), "inactive");
    }
}
