//! Control-plane integration tests: session auth, CSRF, user and
//! provider management, proxy lifecycle, and the OAuth flow.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use tower::ServiceExt;

use common::{ADMIN_PASSWORD, admin_request, bearer_request, json_body, login, spawn_app};
use tollgate_db::ProviderRepository;

#[tokio::test]
async fn test_login_with_wrong_password_is_rejected() {
    let harness = spawn_app().await;

    assert!(login(&harness.app, "pw2").await.is_none());
    assert!(login(&harness.app, ADMIN_PASSWORD).await.is_some());
}

#[tokio::test]
async fn test_auth_status_reflects_session() {
    let harness = spawn_app().await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["authenticated"], false);

    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();
    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/status")
                .header(header::COOKIE, auth.cookie.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["authenticated"], true);
    assert!(body["expires_at"].is_string());
}

#[tokio::test]
async fn test_logout_invalidates_session() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    let response = admin_request(&harness.app, &auth, "POST", "/api/auth/logout", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The session row is gone; admin endpoints reject the old cookie
    let response = admin_request(&harness.app, &auth, "GET", "/api/users", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_endpoints_require_session() {
    let harness = spawn_app().await;

    for uri in ["/api/users", "/api/proxy/status", "/api/usage", "/api/config"] {
        let response = harness
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        let body = json_body(response).await;
        assert_eq!(body["code"], "UNAUTHORIZED");
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn test_mutating_request_without_csrf_header_is_forbidden() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/users")
                .header(header::COOKIE, auth.cookie.as_str())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"alice"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["code"], "FORBIDDEN");

    // No state change happened
    let response = admin_request(&harness.app, &auth, "GET", "/api/users", None).await;
    let body = json_body(response).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_user_crud_lifecycle() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    // Create
    let response = admin_request(
        &harness.app,
        &auth,
        "POST",
        "/api/users",
        Some(serde_json::json!({"name": "alice", "quota_tokens": 1000})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let user_id = body["user"]["id"].as_i64().unwrap();
    let api_key = body["user"].clone();
    assert_eq!(api_key["name"], "alice");
    assert_eq!(api_key["apiKeyPrefix"], "sk-alice");
    assert_eq!(api_key["quotaTokens"], 1000);
    assert!(body["api_key"].as_str().unwrap().starts_with("sk-alice-"));

    // Duplicate name conflicts
    let response = admin_request(
        &harness.app,
        &auth,
        "POST",
        "/api/users",
        Some(serde_json::json!({"name": "alice"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "CONFLICT");

    // Hyphenated names break prefix parsing and are rejected
    let response = admin_request(
        &harness.app,
        &auth,
        "POST",
        "/api/users",
        Some(serde_json::json!({"name": "bad-name"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "VALIDATION_ERROR");

    // Negative quota is invalid
    let response = admin_request(
        &harness.app,
        &auth,
        "POST",
        "/api/users",
        Some(serde_json::json!({"name": "bob", "quota_tokens": -5})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Update
    let response = admin_request(
        &harness.app,
        &auth,
        "PUT",
        &format!("/api/users/{}", user_id),
        Some(serde_json::json!({"enabled": false})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["enabled"], false);

    // Clearing the quota via explicit null
    let response = admin_request(
        &harness.app,
        &auth,
        "PUT",
        &format!("/api/users/{}", user_id),
        Some(serde_json::json!({"quota_tokens": null})),
    )
    .await;
    let body = json_body(response).await;
    assert!(body["quotaTokens"].is_null());

    // Delete
    let response = admin_request(
        &harness.app,
        &auth,
        "DELETE",
        &format!("/api/users/{}", user_id),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = admin_request(
        &harness.app,
        &auth,
        "GET",
        &format!("/api/users/{}", user_id),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_created_key_verifies_and_is_never_returned_again() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    let response = admin_request(
        &harness.app,
        &auth,
        "POST",
        "/api/users",
        Some(serde_json::json!({"name": "alice"})),
    )
    .await;
    let body = json_body(response).await;
    let api_key = body["api_key"].as_str().unwrap().to_string();
    let user_id = body["user"]["id"].as_i64().unwrap();

    // Data plane accepts the key
    harness
        .management
        .set_forward_json(200, &serde_json::json!({"object": "list", "data": []}));
    let response = bearer_request(&harness.app, &api_key, "GET", "/v1/models", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    // No subsequent admin read exposes it
    let response = admin_request(
        &harness.app,
        &auth,
        "GET",
        &format!("/api/users/{}", user_id),
        None,
    )
    .await;
    let body = json_body(response).await;
    assert!(body.get("api_key").is_none());
    assert!(body.get("apiKeyHash").is_none());
}

#[tokio::test]
async fn test_regenerate_key_swaps_credentials() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    let response = admin_request(
        &harness.app,
        &auth,
        "POST",
        "/api/users",
        Some(serde_json::json!({"name": "alice"})),
    )
    .await;
    let body = json_body(response).await;
    let old_key = body["api_key"].as_str().unwrap().to_string();
    let user_id = body["user"]["id"].as_i64().unwrap();

    harness
        .management
        .set_forward_json(200, &serde_json::json!({"object": "list", "data": []}));

    let response = bearer_request(&harness.app, &old_key, "GET", "/v1/models", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Regenerate
    let response = admin_request(
        &harness.app,
        &auth,
        "POST",
        &format!("/api/users/{}/regenerate-key", user_id),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let new_key = body["api_key"].as_str().unwrap().to_string();
    assert_ne!(old_key, new_key);

    // Old key stops authenticating; new key works immediately
    let response = bearer_request(&harness.app, &old_key, "GET", "/v1/models", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = bearer_request(&harness.app, &new_key, "GET", "/v1/models", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_proxy_lifecycle_endpoints() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    let response = admin_request(&harness.app, &auth, "GET", "/api/proxy/status", None).await;
    let body = json_body(response).await;
    assert_eq!(body["running"], false);
    assert_eq!(body["port"], 8317);

    let response = admin_request(&harness.app, &auth, "POST", "/api/proxy/start", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["running"], true);
    assert_eq!(body["pid"], 12345);

    // Start is idempotent
    let response = admin_request(&harness.app, &auth, "POST", "/api/proxy/start", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = admin_request(&harness.app, &auth, "POST", "/api/proxy/stop", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["running"], false);
}

#[tokio::test]
async fn test_config_roundtrip_reports_restart_required() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    let response = admin_request(&harness.app, &auth, "GET", "/api/config", None).await;
    let mut config = json_body(response).await;
    assert_eq!(config["proxy_port"], 8317);

    // Non-sidecar-facing change
    config["requests_per_minute"] = serde_json::json!(120);
    let response = admin_request(
        &harness.app,
        &auth,
        "PUT",
        "/api/config",
        Some(config.clone()),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["restart_required"], false);

    // Sidecar-facing change
    config["proxy_port"] = serde_json::json!(9000);
    let response = admin_request(&harness.app, &auth, "PUT", "/api/config", Some(config)).await;
    let body = json_body(response).await;
    assert_eq!(body["restart_required"], true);

    let response = admin_request(&harness.app, &auth, "GET", "/api/config", None).await;
    assert_eq!(json_body(response).await["proxy_port"], 9000);
}

#[tokio::test]
async fn test_healthz_is_unauthenticated() {
    let harness = spawn_app().await;

    let response = harness
        .app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["proxy_running"], false);
    assert_eq!(body["database_connected"], true);
}

#[tokio::test]
async fn test_oauth_start_requires_session_and_redirects() {
    let harness = spawn_app().await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/oauth/claude/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();
    let response = admin_request(&harness.app, &auth, "GET", "/oauth/claude/start", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://claude.ai/oauth/authorize?"));
    assert!(location.contains("state="));

    // Start registered the provider implicitly
    let provider = ProviderRepository::get_by_name(harness.state.db.pool(), "claude")
        .await
        .unwrap();
    assert!(provider.is_some());
}

#[tokio::test]
async fn test_oauth_callback_with_tampered_state_is_forbidden() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    let _ = admin_request(&harness.app, &auth, "GET", "/oauth/claude/start", None).await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/oauth/claude/callback?code=abc&state=forged-state")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_oauth_callback_after_provider_deletion_is_not_found() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    let response = admin_request(&harness.app, &auth, "GET", "/oauth/claude/start", None).await;
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let state_nonce = location
        .split("state=")
        .nth(1)
        .unwrap()
        .split('&')
        .next()
        .unwrap()
        .to_string();

    // Admin deletes the provider between start and callback
    let response = admin_request(&harness.app, &auth, "DELETE", "/api/providers/claude", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/oauth/claude/callback?code=abc&state={}",
                    state_nonce
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_provider_endpoints() {
    let harness = spawn_app().await;
    let auth = login(&harness.app, ADMIN_PASSWORD).await.unwrap();

    let response = admin_request(&harness.app, &auth, "GET", "/api/providers", None).await;
    let body = json_body(response).await;
    assert_eq!(body["total"], 0);

    // Register implicitly via OAuth start
    let _ = admin_request(&harness.app, &auth, "GET", "/oauth/claude/start", None).await;

    let response = admin_request(&harness.app, &auth, "GET", "/api/providers", None).await;
    let body = json_body(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["providers"][0]["name"], "claude");
    assert_eq!(body["providers"][0]["status"], "no_accounts");

    // Settings validation enforces the closed schema
    let response = admin_request(
        &harness.app,
        &auth,
        "PUT",
        "/api/providers/claude/settings",
        Some(serde_json::json!({"settings": {"load_balancing": "chaotic"}})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = admin_request(
        &harness.app,
        &auth,
        "PUT",
        "/api/providers/claude/settings",
        Some(serde_json::json!({"settings": {"load_balancing": "least_used", "timeout_seconds": 45}})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = admin_request(&harness.app, &auth, "GET", "/api/providers/claude", None).await;
    let body = json_body(response).await;
    assert_eq!(body["settings"]["load_balancing"], "least_used");

    // Unknown provider is NOT_FOUND
    let response = admin_request(&harness.app, &auth, "GET", "/api/providers/mystery", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Health degrades to an annotation when the sidecar has no status
    let response = admin_request(
        &harness.app,
        &auth,
        "GET",
        "/api/providers/claude/health",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "unreachable");
    assert!(body["lastError"].is_string());
}
