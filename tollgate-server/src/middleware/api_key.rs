//! Bearer API-key extractor for the data plane.
//!
//! Parses the bearer into its lookup prefix (up to the second hyphen),
//! fetches the user row, and verifies the full key against the stored
//! argon2id digest. Disabled and unknown users are rejected; the quota
//! gate runs later in the forwarding pipeline.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};

use tollgate_core::crypto;
use tollgate_db::{User, UserRepository};

use crate::{error::ApiError, state::AppState};

pub struct ApiKeyAuth {
    pub user: User,
}

impl<S> FromRequestParts<S> for ApiKeyAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = Arc::<AppState>::from_ref(state);

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

        let api_key = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization format".to_string()))?;

        let prefix = crypto::key_prefix(api_key)
            .ok_or_else(|| ApiError::Unauthorized("Invalid API key format".to_string()))?;

        let found = UserRepository::get_by_prefix(app.db.pool(), prefix)
            .await
            .map_err(|_| ApiError::Unauthorized("Invalid API key".to_string()))?
            .ok_or_else(|| ApiError::Unauthorized("Invalid API key".to_string()))?;

        if !crypto::verify_api_key(api_key, &found.api_key_hash) {
            return Err(ApiError::Unauthorized("Invalid API key".to_string()));
        }

        if !found.user.enabled {
            return Err(ApiError::Forbidden("User is disabled".to_string()));
        }

        Ok(ApiKeyAuth { user: found.user })
    }
}
