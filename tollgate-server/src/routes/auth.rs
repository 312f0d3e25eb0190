//! Admin session endpoints: login, logout, status.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use tollgate_core::crypto;
use tollgate_db::{SESSION_CAP_DAYS, SessionRepository, SettingsRepository, settings};

use crate::error::{ApiError, ApiJson};
use crate::middleware::admin_session::{CSRF_COOKIE, SESSION_COOKIE};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

fn session_cookie(session_id: &str) -> Cookie<'static> {
    let expires = OffsetDateTime::now_utc() + Duration::days(SESSION_CAP_DAYS);
    Cookie::build((SESSION_COOKIE, session_id.to_owned()))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .expires(expires)
        .build()
}

fn csrf_cookie(csrf_token: &str) -> Cookie<'static> {
    let expires = OffsetDateTime::now_utc() + Duration::days(SESSION_CAP_DAYS);
    // Readable by the UI so it can echo the token in X-CSRF-Token
    Cookie::build((CSRF_COOKIE, csrf_token.to_owned()))
        .http_only(false)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .expires(expires)
        .build()
}

fn clear_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let digest = SettingsRepository::get(state.db.pool(), settings::ADMIN_PASSWORD_HASH)
        .await?
        .ok_or_else(|| ApiError::Internal("Admin password not configured".to_string()))?;

    if !crypto::verify_password(&payload.password, &digest) {
        return Err(ApiError::Unauthorized("Invalid password".to_string()));
    }

    let session_id = Uuid::new_v4().to_string();
    let csrf_token = Uuid::new_v4().to_string();
    let session = SessionRepository::create(state.db.pool(), &session_id, &csrf_token).await?;

    info!("Admin logged in");

    let jar = jar
        .add(session_cookie(&session_id))
        .add(csrf_cookie(&csrf_token));

    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            expires_at: session.expires_at.to_rfc3339(),
        }),
    ))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<LogoutResponse>), ApiError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let _ = SessionRepository::delete(state.db.pool(), cookie.value()).await;
    }

    let jar = jar
        .add(clear_cookie(SESSION_COOKIE))
        .add(clear_cookie(CSRF_COOKIE));

    Ok((jar, Json(LogoutResponse { success: true })))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<StatusResponse>, ApiError> {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(Json(StatusResponse {
            authenticated: false,
            expires_at: None,
        }));
    };

    let session = SessionRepository::get_live(state.db.pool(), cookie.value()).await?;
    Ok(Json(match session {
        Some(session) => StatusResponse {
            authenticated: true,
            expires_at: Some(session.expires_at.to_rfc3339()),
        },
        None => StatusResponse {
            authenticated: false,
            expires_at: None,
        },
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/status", get(status))
}
