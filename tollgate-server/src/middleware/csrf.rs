//! CSRF double-submit check for mutating admin requests.
//!
//! The login flow sets a non-HttpOnly `csrf_token` cookie next to the
//! session cookie; every mutating request must echo its value in the
//! `X-CSRF-Token` header.

use axum::{
    extract::Request,
    http::Method,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::error::ApiError;

pub const CSRF_HEADER: &str = "X-CSRF-Token";

pub async fn csrf_protection(
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(next.run(req).await);
    }

    let cookie_token = jar.get(super::admin_session::CSRF_COOKIE).map(|c| c.value().to_string());
    let header_token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match (cookie_token, header_token) {
        (Some(cookie), Some(header)) if cookie == header => Ok(next.run(req).await),
        _ => Err(ApiError::Forbidden("CSRF token mismatch".to_string())),
    }
}
