//! Database error types.

/// Database operation errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// SQL error from sqlx
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Uniqueness or integrity constraint violation.
    ///
    /// Surfaced as-is: uniqueness is a user-visible condition, never
    /// swallowed by callers.
    #[error("{0}")]
    Conflict(String),

    /// Entity not found
    #[error("{0} not found")]
    NotFound(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Map an insert/update error, turning unique violations into
    /// [`DbError::Conflict`] with the given message.
    pub(crate) fn on_conflict(err: sqlx::Error, message: impl Into<String>) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return DbError::Conflict(message.into());
            }
        }
        DbError::Sql(err)
    }
}

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;
