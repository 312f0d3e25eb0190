//! Projection of store state into the sidecar's YAML configuration.
//!
//! Rendering is deterministic: identical store state yields byte-identical
//! output. Providers iterate sorted by name and model mappings live in a
//! `BTreeMap`, so the reload diff check compares meaningfully.

use std::collections::BTreeMap;
use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use tollgate_db::{
    AccountRepository, AccountStatus, DbResult, Provider, ProviderAccount, ProviderRepository,
    SettingsRepository, settings,
};

/// Runtime-tunable server configuration, persisted as one settings row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ServerConfig {
    pub proxy_port: u16,
    pub log_level: String,
    pub auto_start_proxy: bool,
    pub model_mappings: BTreeMap<String, String>,
    pub requests_per_minute: u64,
    pub forward_timeout_seconds: u64,
    pub usage_retention_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            proxy_port: 8317,
            log_level: "info".to_string(),
            auto_start_proxy: true,
            model_mappings: BTreeMap::new(),
            requests_per_minute: 60,
            forward_timeout_seconds: 120,
            usage_retention_days: 90,
        }
    }
}

impl ServerConfig {
    /// Whether switching to `next` requires a sidecar restart to take
    /// effect.
    pub fn restart_required(&self, next: &ServerConfig) -> bool {
        self.proxy_port != next.proxy_port
            || self.log_level != next.log_level
            || self.model_mappings != next.model_mappings
    }
}

/// Load the server configuration, falling back to defaults.
pub async fn load_server_config(pool: &SqlitePool) -> DbResult<ServerConfig> {
    match SettingsRepository::get(pool, settings::SERVER_CONFIG).await? {
        Some(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
        None => Ok(ServerConfig::default()),
    }
}

/// Persist the server configuration.
pub async fn save_server_config(pool: &SqlitePool, config: &ServerConfig) -> DbResult<()> {
    let json = serde_json::to_string(config).expect("ServerConfig serializes");
    SettingsRepository::set(pool, settings::SERVER_CONFIG, &json).await
}

/// Get the internal gateway key the sidecar accepts, generating and
/// persisting one on first use. The data-plane forwarder authenticates
/// with this key; client bearers are terminated at the gateway.
pub async fn ensure_internal_key(pool: &SqlitePool) -> DbResult<String> {
    if let Some(key) = SettingsRepository::get(pool, settings::GATEWAY_INTERNAL_KEY).await? {
        return Ok(key);
    }

    let mut raw = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut raw);
    let key = format!("tg-{}", hex::encode(raw));
    SettingsRepository::set(pool, settings::GATEWAY_INTERNAL_KEY, &key).await?;
    Ok(key)
}

fn settings_u64(provider: &Provider, key: &str, default: u64) -> u64 {
    provider.settings[key].as_u64().unwrap_or(default)
}

fn settings_str<'a>(provider: &'a Provider, key: &str, default: &'a str) -> &'a str {
    provider.settings[key].as_str().unwrap_or(default)
}

/// Render the sidecar YAML from the given state.
pub fn render_sidecar_yaml(
    config: &ServerConfig,
    internal_key: &str,
    state_dir: &Path,
    providers: &[(Provider, Vec<ProviderAccount>)],
) -> String {
    let mut lines = Vec::new();

    lines.push(format!("port: {}", config.proxy_port));
    lines.push(format!("log-level: {}", config.log_level));
    lines.push(format!("auth-dir: {}", state_dir.display()));
    lines.push("api-keys:".to_string());
    lines.push(format!("  - {}", internal_key));

    if !config.model_mappings.is_empty() {
        lines.push("model-mappings:".to_string());
        for (from, to) in &config.model_mappings {
            lines.push(format!("  {}: {}", from, to));
        }
    }

    let enabled: Vec<_> = providers.iter().filter(|(p, _)| p.enabled).collect();
    if !enabled.is_empty() {
        lines.push("providers:".to_string());
        for (provider, accounts) in enabled {
            let active = accounts
                .iter()
                .filter(|a| a.status == AccountStatus::Active)
                .count();
            if active == 0 {
                continue;
            }
            lines.push(format!("  {}:", provider.name));
            lines.push("    enabled: true".to_string());
            lines.push(format!(
                "    load-balancing: {}",
                settings_str(provider, "load_balancing", "round_robin")
            ));
            lines.push(format!(
                "    timeout-seconds: {}",
                settings_u64(provider, "timeout_seconds", config.forward_timeout_seconds)
            ));
            lines.push(format!(
                "    request-retry: {}",
                settings_u64(provider, "request_retry", 0)
            ));
            lines.push(format!("    accounts: {}", active));
        }
    }

    if config.requests_per_minute > 0 {
        lines.push("rate-limits:".to_string());
        lines.push(format!(
            "  requests-per-minute: {}",
            config.requests_per_minute
        ));
    }

    let mut yaml = lines.join("\n");
    yaml.push('\n');
    yaml
}

/// Render the YAML for the current store state.
///
/// Providers arrive sorted by name from the store, which is what makes
/// the output stable across calls.
pub async fn render_from_store(pool: &SqlitePool, state_dir: &Path) -> DbResult<String> {
    let config = load_server_config(pool).await?;
    let internal_key = ensure_internal_key(pool).await?;

    let mut providers = Vec::new();
    for provider in ProviderRepository::list(pool).await? {
        let accounts = AccountRepository::list_for_provider(pool, provider.id).await?;
        providers.push((provider, accounts));
    }

    Ok(render_sidecar_yaml(
        &config,
        &internal_key,
        state_dir,
        &providers,
    ))
}

/// Write a file atomically: write to a sibling temp path, then rename.
/// A partially-written config is therefore never observable.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
