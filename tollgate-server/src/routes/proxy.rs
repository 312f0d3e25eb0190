//! Sidecar lifecycle control endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;

use tollgate_db::ProviderRepository;

use crate::error::ApiError;
use crate::middleware::AdminSession;
use crate::sidecar::SupervisorStatus;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: SupervisorStatus,
    pub active_providers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: SupervisorStatus,
}

async fn status_with_providers(state: &AppState) -> Result<StatusResponse, ApiError> {
    let status = state.supervisor.status().await?;

    let active_providers = if status.running {
        ProviderRepository::list(state.db.pool())
            .await?
            .into_iter()
            .filter(|p| p.enabled)
            .map(|p| p.name)
            .collect()
    } else {
        Vec::new()
    };

    Ok(StatusResponse {
        status,
        active_providers,
    })
}

pub async fn proxy_status(
    _session: AdminSession,
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(status_with_providers(&state).await?))
}

pub async fn start(
    _session: AdminSession,
    State(state): State<Arc<AppState>>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    state.supervisor.start().await?;
    Ok(Json(LifecycleResponse {
        success: true,
        status: state.supervisor.status().await?,
    }))
}

pub async fn stop(
    _session: AdminSession,
    State(state): State<Arc<AppState>>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    state.supervisor.stop().await?;
    Ok(Json(LifecycleResponse {
        success: true,
        status: state.supervisor.status().await?,
    }))
}

pub async fn restart(
    _session: AdminSession,
    State(state): State<Arc<AppState>>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    state.supervisor.restart().await?;
    Ok(Json(LifecycleResponse {
        success: true,
        status: state.supervisor.status().await?,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(proxy_status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/restart", post(restart))
}
