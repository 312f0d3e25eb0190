//! Database connection pool and initialization.

use std::path::Path;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;

use crate::error::{DbError, DbResult};

/// Default size of the bounded connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Database pool wrapper
#[derive(Debug, Clone)]
pub struct TollgateDb {
    pool: SqlitePool,
}

impl TollgateDb {
    /// Initialize the database at `db_path` with migrations.
    ///
    /// This function:
    /// 1. Ensures the parent directory exists
    /// 2. Creates/connects to the database in WAL mode
    /// 3. Runs migrations inside the sqlx migrations ledger
    pub async fn new(db_path: &Path) -> DbResult<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = Self::create_pool(db_path, DEFAULT_MAX_CONNECTIONS).await?;
        Self::run_migrations(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    /// Get the inner SQLx pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_pool(db_path: &Path, max_connections: u32) -> DbResult<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        // WAL keeps readers concurrent while the engine serializes writes
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;

        Ok(pool)
    }

    /// Run database migrations using the sqlx migrate macro.
    ///
    /// The `_sqlx_migrations` table is the ledger of applied ids.
    async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Close the pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Wrap an existing pool (used by tests)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
