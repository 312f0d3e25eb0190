//! Test helpers for the tollgate store.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::{
    db::TollgateDb,
    error::{DbError, DbResult},
};

/// Create an in-memory database for testing.
pub async fn create_test_db() -> DbResult<TollgateDb> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

    Ok(TollgateDb::from_pool(pool))
}
