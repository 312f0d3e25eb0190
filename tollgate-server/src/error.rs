//! The closed error taxonomy and its HTTP envelope.
//!
//! Every error path answers with `{"success":false,"error":<msg>,
//! "code":<CODE>}` where `code` is one of the closed set below.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use tollgate_core::CryptoError;
use tollgate_db::DbError;

use crate::sidecar::SidecarError;

/// API-visible error with a closed code taxonomy
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Quota exceeded")]
    QuotaExceeded,

    #[error("Rate limit exceeded")]
    RateLimited { limit: u64, retry_after_secs: u64 },

    #[error("{0}")]
    Provider(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: String,
    code: &'static str,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::QuotaExceeded => "QUOTA_EXCEEDED",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Provider(_) => "PROVIDER_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::QuotaExceeded | ApiError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            success: false,
            error: self.to_string(),
            code: self.code(),
        };

        let mut response = (self.status(), Json(envelope)).into_response();

        if let ApiError::RateLimited {
            limit,
            retry_after_secs,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", limit.into());
            headers.insert("X-RateLimit-Remaining", 0u64.into());
            headers.insert("X-RateLimit-Reset", retry_after_secs.into());
        }

        response
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(msg) => ApiError::Conflict(msg),
            DbError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            other => ApiError::Internal(format!("Database error: {}", other)),
        }
    }
}

impl From<CryptoError> for ApiError {
    // Unsealable rows are fatal for that credential; upstream sees a
    // provider failure, never a silent re-key.
    fn from(err: CryptoError) -> Self {
        ApiError::Provider(format!("Credential store error: {}", err))
    }
}

impl From<SidecarError> for ApiError {
    fn from(err: SidecarError) -> Self {
        ApiError::Provider(err.to_string())
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        ApiError::Validation(format!("Invalid JSON body: {}", err))
    }
}

/// JSON body extractor whose rejection speaks the error envelope.
#[derive(axum::extract::FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_pairs() {
        let cases: Vec<(ApiError, StatusCode, &str)> = vec![
            (
                ApiError::Unauthorized("no".into()),
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
            ),
            (
                ApiError::Forbidden("no".into()),
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
            ),
            (
                ApiError::NotFound("x".into()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                ApiError::Validation("x".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                ApiError::Conflict("x".into()),
                StatusCode::CONFLICT,
                "CONFLICT",
            ),
            (
                ApiError::QuotaExceeded,
                StatusCode::TOO_MANY_REQUESTS,
                "QUOTA_EXCEEDED",
            ),
            (
                ApiError::RateLimited {
                    limit: 60,
                    retry_after_secs: 10,
                },
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
            ),
            (
                ApiError::Provider("x".into()),
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
            ),
            (
                ApiError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_conflict_maps_through() {
        let err: ApiError = DbError::Conflict("user 'alice' already exists".into()).into();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(err.to_string(), "user 'alice' already exists");
    }
}
