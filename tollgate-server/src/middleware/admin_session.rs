//! Admin session extractor.
//!
//! Reads the opaque session cookie, resolves a live session row, and
//! slides its expiry window forward. Handlers that take [`AdminSession`]
//! are session-protected.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::CookieJar;

use tollgate_db::{Session, SessionRepository};

use crate::{error::ApiError, state::AppState};

/// Cookie holding the opaque session id.
pub const SESSION_COOKIE: &str = "session";
/// Non-HttpOnly companion cookie holding the CSRF token.
pub const CSRF_COOKIE: &str = "csrf_token";

pub struct AdminSession {
    pub session: Session,
}

impl<S> FromRequestParts<S> for AdminSession
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = Arc::<AppState>::from_ref(state);

        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Unauthorized("Unauthorized".to_string()))?;

        let session_id = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))?;

        let session = SessionRepository::get_live(app.db.pool(), &session_id)
            .await
            .map_err(|_| ApiError::Unauthorized("Unauthorized".to_string()))?
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))?;

        // Sliding window; failure to extend never blocks the request
        let _ = SessionRepository::touch(app.db.pool(), &session).await;

        Ok(AdminSession { session })
    }
}
