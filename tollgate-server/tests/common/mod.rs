//! Shared harness for integration tests: an in-memory app wired to mock
//! sidecar process and management clients.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use serde_json::Value;
use tower::ServiceExt;

use tollgate_core::{TokenCipher, crypto};
use tollgate_db::{SettingsRepository, settings, test_helpers::create_test_db};
use tollgate_server::sidecar::{MockSidecarManagement, MockSidecarProcess, Supervisor, config_gen};
use tollgate_server::{AppState, server};

pub const ADMIN_PASSWORD: &str = "pw1";
pub const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

pub struct TestApp {
    pub app: Router,
    pub state: Arc<AppState>,
    pub process: Arc<MockSidecarProcess>,
    pub management: Arc<MockSidecarManagement>,
    _dir: tempfile::TempDir,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_rpm(60).await
}

pub async fn spawn_app_with_rpm(requests_per_minute: u64) -> TestApp {
    let db = create_test_db().await.unwrap();

    let digest = crypto::hash_password(ADMIN_PASSWORD).unwrap();
    SettingsRepository::set(db.pool(), settings::ADMIN_PASSWORD_HASH, &digest)
        .await
        .unwrap();
    let internal_key = config_gen::ensure_internal_key(db.pool()).await.unwrap();

    let process = Arc::new(MockSidecarProcess::default());
    let management = Arc::new(MockSidecarManagement::default());
    management.set_healthy();

    let dir = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(Supervisor::new(
        db.clone(),
        process.clone(),
        management.clone(),
        dir.path().join("sidecar-config.yaml"),
        dir.path().join("sidecar"),
        "http://127.0.0.1:8317".to_string(),
    ));

    let cipher = TokenCipher::from_key_str(TEST_KEY).unwrap();
    let state = Arc::new(AppState::new(
        db,
        cipher,
        supervisor,
        requests_per_minute,
        internal_key,
    ));
    let app = server::create_router(Arc::clone(&state));

    TestApp {
        app,
        state,
        process,
        management,
        _dir: dir,
    }
}

/// An authenticated admin: cookie header value plus CSRF token.
pub struct AdminAuth {
    pub cookie: String,
    pub csrf_token: String,
}

fn cookie_value<'a>(set_cookie: &'a str, name: &str) -> Option<&'a str> {
    let rest = set_cookie.strip_prefix(&format!("{}=", name))?;
    Some(rest.split(';').next().unwrap_or(rest))
}

/// Log in and collect the session and CSRF cookies.
pub async fn login(app: &Router, password: &str) -> Option<AdminAuth> {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(r#"{{"password":"{}"}}"#, password)))
                .unwrap(),
        )
        .await
        .unwrap();

    if response.status() != 200 {
        return None;
    }

    let mut session = None;
    let mut csrf = None;
    for value in response.headers().get_all(header::SET_COOKIE) {
        let raw = value.to_str().unwrap();
        if let Some(v) = cookie_value(raw, "session") {
            session = Some(v.to_string());
        }
        if let Some(v) = cookie_value(raw, "csrf_token") {
            csrf = Some(v.to_string());
        }
    }

    let session = session?;
    let csrf_token = csrf?;
    Some(AdminAuth {
        cookie: format!("session={}; csrf_token={}", session, csrf_token),
        csrf_token,
    })
}

/// Issue an admin request with session cookie and CSRF header.
pub async fn admin_request(
    app: &Router,
    auth: &AdminAuth,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, auth.cookie.as_str())
        .header("X-CSRF-Token", auth.csrf_token.as_str());

    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };

    app.clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap()
}

/// Issue a bearer-authenticated data-plane request.
pub async fn bearer_request(
    app: &Router,
    api_key: &str,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", api_key));

    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };

    app.clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap()
}

/// Read a response body as JSON.
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
