//! OpenAI-shaped data-plane endpoints.
//!
//! Bodies pass through untouched; this layer only authenticates, gates,
//! forwards, and accounts.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, Method},
    response::Response,
    routing::{get, post},
};
use bytes::Bytes;

use crate::error::ApiError;
use crate::gateway;
use crate::middleware::ApiKeyAuth;
use crate::state::AppState;

pub async fn models(
    State(state): State<Arc<AppState>>,
    ApiKeyAuth { user }: ApiKeyAuth,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    gateway::forward(
        &state,
        user,
        "/v1/models",
        Method::GET,
        headers,
        Bytes::new(),
        false,
    )
    .await
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    ApiKeyAuth { user }: ApiKeyAuth,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    gateway::forward(
        &state,
        user,
        "/v1/chat/completions",
        Method::POST,
        headers,
        body,
        true,
    )
    .await
}

pub async fn completions(
    State(state): State<Arc<AppState>>,
    ApiKeyAuth { user }: ApiKeyAuth,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    gateway::forward(
        &state,
        user,
        "/v1/completions",
        Method::POST,
        headers,
        body,
        true,
    )
    .await
}

pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    ApiKeyAuth { user }: ApiKeyAuth,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    gateway::forward(
        &state,
        user,
        "/v1/embeddings",
        Method::POST,
        headers,
        body,
        true,
    )
    .await
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(models))
        .route("/chat/completions", post(chat_completions))
        .route("/completions", post(completions))
        .route("/embeddings", post(embeddings))
}
