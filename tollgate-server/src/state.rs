//! Shared application state.

use std::sync::{Arc, RwLock};

use sqlx::SqlitePool;

use tollgate_core::TokenCipher;
use tollgate_db::{DbResult, TollgateDb};

use crate::middleware::RateGate;
use crate::sidecar::{ServerConfig, Supervisor, config_gen};

/// Advisory in-process cache over the persisted [`ServerConfig`],
/// invalidated on every write.
pub struct SettingsCache {
    inner: RwLock<Option<ServerConfig>>,
}

impl SettingsCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Get the cached config, loading from the store on a miss.
    pub async fn get(&self, pool: &SqlitePool) -> DbResult<ServerConfig> {
        if let Some(config) = self.inner.read().unwrap().clone() {
            return Ok(config);
        }

        let config = config_gen::load_server_config(pool).await?;
        *self.inner.write().unwrap() = Some(config.clone());
        Ok(config)
    }

    /// Drop the cached value; the next read refetches.
    pub fn invalidate(&self) {
        *self.inner.write().unwrap() = None;
    }
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared application state behind an `Arc`
pub struct AppState {
    /// Store handle
    pub db: TollgateDb,
    /// Credential cipher, read-only after init
    pub cipher: TokenCipher,
    /// Sidecar lifecycle owner
    pub supervisor: Arc<Supervisor>,
    /// Per-user data-plane rate gate
    pub rate_gate: RateGate,
    /// Cached server configuration
    pub settings: SettingsCache,
    /// HTTP client for OAuth token exchange
    pub http: reqwest::Client,
    /// Key the sidecar accepts from this gateway
    pub internal_key: String,
}

impl AppState {
    pub fn new(
        db: TollgateDb,
        cipher: TokenCipher,
        supervisor: Arc<Supervisor>,
        requests_per_minute: u64,
        internal_key: String,
    ) -> Self {
        Self {
            db,
            cipher,
            supervisor,
            rate_gate: RateGate::new(requests_per_minute),
            settings: SettingsCache::new(),
            http: reqwest::Client::new(),
            internal_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_db::test_helpers::create_test_db;

    #[tokio::test]
    async fn test_settings_cache_invalidation() {
        let db = create_test_db().await.unwrap();
        let pool = db.pool();
        let cache = SettingsCache::new();

        let first = cache.get(pool).await.unwrap();
        assert_eq!(first.proxy_port, 8317);

        let mut changed = first.clone();
        changed.proxy_port = 9000;
        config_gen::save_server_config(pool, &changed).await.unwrap();

        // Stale until invalidated
        assert_eq!(cache.get(pool).await.unwrap().proxy_port, 8317);

        cache.invalidate();
        assert_eq!(cache.get(pool).await.unwrap().proxy_port, 9000);
    }
}
