//! OAuth start and callback endpoints.
//!
//! Start is session-protected and registers the provider implicitly,
//! which makes the deleted-between-start-and-callback case decidable:
//! a missing provider row at callback time proves an admin deleted it,
//! and the exchange result is dropped with `NOT_FOUND`.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::HOST},
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tracing::{info, warn};

use tollgate_db::{
    AccountRepository, OAuthStateRepository, ProviderKind, ProviderRepository, SessionRepository,
};

use crate::error::ApiError;
use crate::middleware::AdminSession;
use crate::oauth;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn callback_url(headers: &HeaderMap, provider: &str) -> String {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("127.0.0.1:3000");
    format!("http://{}/oauth/{}/callback", host, provider)
}

/// A plain 302 redirect.
fn found(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", location)
        .body(axum::body::Body::empty())
        .expect("redirect response builds")
}

fn ui_outcome(provider: &str, outcome: &str) -> Response {
    found(&format!("/?oauth={}&provider={}", outcome, provider))
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    session: AdminSession,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let desc = oauth::descriptor(&provider)
        .ok_or_else(|| ApiError::Validation(format!("Unsupported provider: {}", provider)))?;

    let pool = state.db.pool();
    ProviderRepository::ensure(pool, &provider, ProviderKind::Oauth).await?;

    let nonce = OAuthStateRepository::create(pool, &provider, &session.session.id).await?;
    let redirect_uri = callback_url(&headers, &provider);

    info!(provider = %provider, "Starting OAuth flow");
    Ok(found(&desc.authorize_redirect(&nonce, &redirect_uri)))
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let desc = oauth::descriptor(&provider)
        .ok_or_else(|| ApiError::Validation(format!("Unsupported provider: {}", provider)))?;
    let pool = state.db.pool();

    if let Some(error) = query.error {
        warn!(
            provider = %provider,
            "OAuth flow denied upstream: {} {}",
            error,
            query.error_description.unwrap_or_default()
        );
        return Ok(ui_outcome(&provider, "error"));
    }

    // The state nonce must be live, single-use, and owned by a live
    // admin session; anything else is a forged or replayed callback.
    let nonce = query
        .state
        .ok_or_else(|| ApiError::Forbidden("Missing OAuth state".to_string()))?;
    let flow = OAuthStateRepository::consume(pool, &nonce)
        .await?
        .ok_or_else(|| ApiError::Forbidden("OAuth state is invalid or expired".to_string()))?;

    if flow.provider != provider {
        return Err(ApiError::Forbidden(
            "OAuth state does not match this provider".to_string(),
        ));
    }

    SessionRepository::get_live(pool, &flow.admin_session_id)
        .await?
        .ok_or_else(|| {
            ApiError::Forbidden("Admin session that started this flow has ended".to_string())
        })?;

    // Deleted between start and callback: reject and drop the exchange
    let provider_row = ProviderRepository::get_by_name(pool, &provider)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}' not found", provider)))?;

    let code = query
        .code
        .ok_or_else(|| ApiError::Validation("Missing authorization code".to_string()))?;

    let redirect_uri = callback_url(&headers, &provider);
    let exchanged = match oauth::exchange_code(&state.http, desc, &code, &redirect_uri).await {
        Ok(exchanged) => exchanged,
        Err(e) => {
            warn!(provider = %provider, "OAuth code exchange failed: {}", e);
            return Ok(ui_outcome(&provider, "error"));
        }
    };

    let sealed = state.cipher.seal(&exchanged.tokens)?;
    let account = AccountRepository::upsert_by_email(
        pool,
        provider_row.id,
        exchanged.email.as_deref(),
        &sealed,
        exchanged.expires_at,
    )
    .await?;

    info!(
        provider = %provider,
        account = account.id,
        "OAuth flow completed; credential stored"
    );

    if let Err(e) = state.supervisor.reload().await {
        warn!("Sidecar reload after OAuth completion failed: {}", e);
    }

    Ok(ui_outcome(&provider, "success"))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{provider}/start", get(start))
        .route("/{provider}/callback", get(callback))
}
