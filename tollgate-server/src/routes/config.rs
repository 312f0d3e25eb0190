//! Server configuration endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::get,
};
use serde::Serialize;

use crate::error::{ApiError, ApiJson};
use crate::middleware::AdminSession;
use crate::sidecar::{ServerConfig, config_gen};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    /// Whether a sidecar restart is needed for the change to take effect
    pub restart_required: bool,
}

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

fn validate(config: &ServerConfig) -> Result<(), ApiError> {
    if config.proxy_port == 0 {
        return Err(ApiError::Validation("proxy_port must be non-zero".to_string()));
    }
    if !LOG_LEVELS.contains(&config.log_level.as_str()) {
        return Err(ApiError::Validation(format!(
            "log_level must be one of {}",
            LOG_LEVELS.join(", ")
        )));
    }
    if config.forward_timeout_seconds == 0 {
        return Err(ApiError::Validation(
            "forward_timeout_seconds must be non-zero".to_string(),
        ));
    }
    Ok(())
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> Result<Json<ServerConfig>, ApiError> {
    Ok(Json(state.settings.get(state.db.pool()).await?))
}

pub async fn put_config(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    ApiJson(payload): ApiJson<ServerConfig>,
) -> Result<Json<UpdateResponse>, ApiError> {
    validate(&payload)?;

    let current = state.settings.get(state.db.pool()).await?;
    let restart_required = current.restart_required(&payload);

    config_gen::save_server_config(state.db.pool(), &payload).await?;
    state.settings.invalidate();

    Ok(Json(UpdateResponse {
        success: true,
        restart_required,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/config", get(get_config).put(put_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::default();
        assert!(validate(&config).is_ok());

        config.proxy_port = 0;
        assert!(validate(&config).is_err());

        config = ServerConfig::default();
        config.log_level = "loud".to_string();
        assert!(validate(&config).is_err());

        config = ServerConfig::default();
        config.forward_timeout_seconds = 0;
        assert!(validate(&config).is_err());
    }
}
