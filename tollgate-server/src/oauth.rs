//! Provider OAuth: descriptors, code exchange, and refresh.
//!
//! One descriptor per supported provider drives both the authorize
//! redirect and the token endpoints. Exchanged credentials are sealed by
//! the token cipher before they reach the store; refresh updates rows in
//! place and marks accounts expired when the grant is rejected.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use tollgate_db::{
    AccountRepository, AccountStatus, ProviderAccount, ProviderRepository,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Static description of one OAuth provider
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub userinfo_url: Option<&'static str>,
    pub client_id_env: &'static str,
    pub default_client_id: &'static str,
    pub scopes: &'static str,
}

/// The closed set of supported OAuth providers.
pub const PROVIDERS: &[ProviderDescriptor] = &[
    ProviderDescriptor {
        name: "claude",
        authorize_url: "https://claude.ai/oauth/authorize",
        token_url: "https://console.anthropic.com/v1/oauth/token",
        userinfo_url: None,
        client_id_env: "CLAUDE_OAUTH_CLIENT_ID",
        default_client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e",
        scopes: "org:create_api_key user:profile",
    },
    ProviderDescriptor {
        name: "openai",
        authorize_url: "https://auth.openai.com/oauth/authorize",
        token_url: "https://auth.openai.com/oauth/token",
        userinfo_url: Some("https://auth.openai.com/oauth/userinfo"),
        client_id_env: "OPENAI_OAUTH_CLIENT_ID",
        default_client_id: "app_EMoamEEZ73f0CkXaXp7hrann",
        scopes: "openid profile email offline_access",
    },
    ProviderDescriptor {
        name: "gemini",
        authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        userinfo_url: Some("https://openidconnect.googleapis.com/v1/userinfo"),
        client_id_env: "GEMINI_OAUTH_CLIENT_ID",
        default_client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com",
        scopes: "openid email https://www.googleapis.com/auth/cloud-platform",
    },
];

/// Look up a provider descriptor by name.
pub fn descriptor(name: &str) -> Option<&'static ProviderDescriptor> {
    PROVIDERS.iter().find(|p| p.name == name)
}

impl ProviderDescriptor {
    pub fn client_id(&self) -> String {
        std::env::var(self.client_id_env).unwrap_or_else(|_| self.default_client_id.to_string())
    }

    /// Build the authorize redirect carrying our state nonce.
    pub fn authorize_redirect(&self, state: &str, redirect_uri: &str) -> String {
        let url = reqwest::Url::parse_with_params(
            self.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id().as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", self.scopes),
                ("state", state),
            ],
        )
        .expect("authorize URL is valid");
        url.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserinfoResponse {
    email: Option<String>,
}

/// Result of a successful authorization-code exchange
pub struct ExchangedTokens {
    /// Plaintext credential document; callers seal it before storage
    pub tokens: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub email: Option<String>,
}

fn expiry_from(expires_in: Option<u64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + TimeDelta::seconds(secs as i64))
}

/// Exchange an authorization code for tokens, fetching the identifying
/// email when the provider exposes one.
pub async fn exchange_code(
    http: &reqwest::Client,
    desc: &ProviderDescriptor,
    code: &str,
    redirect_uri: &str,
) -> Result<ExchangedTokens, ApiError> {
    let response = http
        .post(desc.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", desc.client_id().as_str()),
        ])
        .send()
        .await
        .map_err(|e| ApiError::Provider(format!("Token exchange failed: {}", e)))?
        .error_for_status()
        .map_err(|e| ApiError::Provider(format!("Token exchange rejected: {}", e)))?;

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| ApiError::Provider(format!("Malformed token response: {}", e)))?;

    let email = match desc.userinfo_url {
        Some(url) => fetch_email(http, url, &token.access_token).await,
        None => None,
    };

    let expires_at = expiry_from(token.expires_in);
    let tokens = serde_json::json!({
        "access_token": token.access_token,
        "refresh_token": token.refresh_token,
        "expires_at": expires_at,
    });

    Ok(ExchangedTokens {
        tokens,
        expires_at,
        email,
    })
}

async fn fetch_email(http: &reqwest::Client, url: &str, access_token: &str) -> Option<String> {
    let response = http
        .get(url)
        .bearer_auth(access_token)
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?;
    response.json::<UserinfoResponse>().await.ok()?.email
}

/// Refresh one account's tokens in place. Returns `true` on success; a
/// rejected grant marks the account expired.
async fn refresh_account(
    state: &AppState,
    desc: &ProviderDescriptor,
    account: &ProviderAccount,
) -> Result<bool, ApiError> {
    let pool = state.db.pool();

    let Some(sealed) = AccountRepository::sealed_tokens(pool, account.id).await? else {
        return Ok(false);
    };
    let tokens = state.cipher.open(&sealed)?;

    let Some(refresh_token) = tokens["refresh_token"].as_str().map(str::to_string) else {
        return Ok(false);
    };

    let response = state
        .http
        .post(desc.token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", desc.client_id().as_str()),
        ])
        .send()
        .await;

    let token: TokenResponse = match response.and_then(|r| r.error_for_status()) {
        Ok(r) => match r.json().await {
            Ok(token) => token,
            Err(e) => {
                warn!(account = account.id, "Malformed refresh response: {}", e);
                AccountRepository::set_status(pool, account.id, AccountStatus::Expired).await?;
                return Ok(false);
            }
        },
        Err(e) => {
            warn!(account = account.id, "Token refresh rejected: {}", e);
            AccountRepository::set_status(pool, account.id, AccountStatus::Expired).await?;
            return Ok(false);
        }
    };

    let expires_at = expiry_from(token.expires_in);
    let renewed = serde_json::json!({
        "access_token": token.access_token,
        // Providers that omit a new refresh token keep the old one
        "refresh_token": token.refresh_token.unwrap_or(refresh_token),
        "expires_at": expires_at,
    });

    let sealed = state.cipher.seal(&renewed)?;
    AccountRepository::update_tokens(pool, account.id, &sealed, expires_at).await?;
    info!(account = account.id, "Refreshed provider tokens");
    Ok(true)
}

/// Refresh every active account of a provider. Returns `true` when at
/// least one account was renewed.
pub async fn refresh_provider_accounts(
    state: &AppState,
    provider_name: &str,
) -> Result<bool, ApiError> {
    let Some(desc) = descriptor(provider_name) else {
        return Ok(false);
    };
    let pool = state.db.pool();

    let Some(provider) = ProviderRepository::get_by_name(pool, provider_name).await? else {
        return Ok(false);
    };

    let mut any = false;
    for account in AccountRepository::list_for_provider(pool, provider.id).await? {
        if account.status != AccountStatus::Active {
            continue;
        }
        if refresh_account(state, desc, &account).await? {
            any = true;
        }
    }

    Ok(any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_lookup_is_closed() {
        assert!(descriptor("claude").is_some());
        assert!(descriptor("openai").is_some());
        assert!(descriptor("gemini").is_some());
        assert!(descriptor("copilot").is_none());
        assert!(descriptor("").is_none());
    }

    #[test]
    fn test_authorize_redirect_carries_state() {
        let desc = descriptor("gemini").unwrap();
        let url = desc.authorize_redirect("state-123", "http://localhost:3000/oauth/gemini/callback");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("state=state-123"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Foauth%2Fgemini%2Fcallback"));
    }

    #[test]
    fn test_expiry_from_seconds() {
        assert!(expiry_from(None).is_none());

        let expiry = expiry_from(Some(3600)).unwrap();
        let delta = expiry - Utc::now();
        assert!(delta > TimeDelta::minutes(59));
        assert!(delta <= TimeDelta::minutes(61));
    }
}
