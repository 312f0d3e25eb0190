//! Router assembly and server entry.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::middleware::csrf::csrf_protection;
use crate::routes;
use crate::state::AppState;

/// Timeout applied to every admin request.
const ADMIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    proxy_running: bool,
    proxy_pid: Option<u32>,
    uptime_seconds: Option<u64>,
    database_connected: bool,
}

/// Unauthenticated liveness probe.
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let proxy = state.supervisor.status().await.ok();
    let database_connected = !state.db.pool().is_closed();

    let (proxy_running, proxy_pid, uptime_seconds) = match &proxy {
        Some(status) => (status.running, status.pid, status.uptime_seconds),
        None => (false, None, None),
    };

    let status = if !database_connected {
        "error"
    } else if !proxy_running {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        proxy_running,
        proxy_pid,
        uptime_seconds,
        database_connected,
    })
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Admin surface: session-protected handlers, CSRF on writes
    let admin_api = Router::new()
        .nest("/users", routes::users::router())
        .nest("/providers", routes::providers::router())
        .nest("/proxy", routes::proxy::router())
        .nest("/usage", routes::usage::router())
        .nest("/logs", routes::logs::router())
        .merge(routes::config::router())
        .layer(axum_middleware::from_fn(csrf_protection))
        .layer(TimeoutLayer::new(ADMIN_TIMEOUT));

    let auth_api = routes::auth::router().layer(TimeoutLayer::new(ADMIN_TIMEOUT));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/auth", auth_api)
        .nest("/api", admin_api)
        .nest("/oauth", routes::oauth::router())
        .nest("/v1", routes::v1::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server.
pub async fn run(state: Arc<AppState>, bind_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
