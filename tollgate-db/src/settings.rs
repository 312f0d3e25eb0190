//! Process-wide key/value settings.

use sqlx::SqlitePool;

use crate::error::DbResult;

/// Well-known settings keys.
pub const ADMIN_PASSWORD_HASH: &str = "admin_password_hash";
pub const SERVER_CONFIG: &str = "server_config";
pub const GATEWAY_INTERNAL_KEY: &str = "gateway_internal_key";

/// Repository for the settings table
pub struct SettingsRepository;

impl SettingsRepository {
    /// Get a setting value.
    pub async fn get(pool: &SqlitePool, key: &str) -> DbResult<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
        Ok(value)
    }

    /// Upsert a setting value.
    pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> DbResult<()> {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::create_test_db;

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let db = create_test_db().await.unwrap();
        let pool = db.pool();

        assert!(SettingsRepository::get(pool, "missing").await.unwrap().is_none());

        SettingsRepository::set(pool, ADMIN_PASSWORD_HASH, "$argon2id$v1")
            .await
            .unwrap();
        assert_eq!(
            SettingsRepository::get(pool, ADMIN_PASSWORD_HASH)
                .await
                .unwrap()
                .as_deref(),
            Some("$argon2id$v1")
        );

        // Replace in place
        SettingsRepository::set(pool, ADMIN_PASSWORD_HASH, "$argon2id$v2")
            .await
            .unwrap();
        assert_eq!(
            SettingsRepository::get(pool, ADMIN_PASSWORD_HASH)
                .await
                .unwrap()
                .as_deref(),
            Some("$argon2id$v2")
        );
    }
}
