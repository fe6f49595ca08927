//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    #[error("image request not found: {0}")]
    RequestNotFound(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("corrupt fingerprint column: {0}")]
    CorruptFingerprint(String),
}

impl DbError {
    /// Whether the caller should retry an idempotent operation with
    /// bounded backoff rather than treat this as terminal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Connect(_) => true,
            DbError::Query(e) => is_retryable_sqlx_error(e),
            DbError::Migration(_)
            | DbError::RequestNotFound(_)
            | DbError::ImageNotFound(_)
            | DbError::CorruptFingerprint(_) => false,
        }
    }
}

fn is_retryable_sqlx_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                matches!(
                    code.as_ref(),
                    "40001" | // serialization_failure
                    "40P01" | // deadlock_detected
                    "57P01" | // admin_shutdown
                    "57P02" | // crash_shutdown
                    "57P03" // cannot_connect_now
                )
            } else {
                false
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_errors_are_retryable() {
        let err = DbError::RequestNotFound("abc".to_string());
        assert!(!err.is_retryable());
    }
}
