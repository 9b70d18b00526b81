//! Part cache error types.

use thiserror::Error;

/// Part cache operation errors.
///
/// A cache miss is never an error: lookups return `Ok(None)` or an empty list.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Malformed input, rejected before any storage call.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backing store is unreachable, locked past its timeout, or timed out.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Whether the caller should fall back to uploading without dedup.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

/// SQLite primary result codes for a medium that is busy, locked or cannot
/// be opened or written: BUSY, LOCKED, READONLY, IOERR, FULL, CANTOPEN.
///
/// sqlx reports extended codes (e.g. 517 `SQLITE_BUSY_SNAPSHOT`); the primary
/// code is the low byte.
fn is_unavailable_sqlite_code(code: &str) -> bool {
    code.parse::<i32>()
        .is_ok_and(|code| matches!(code & 0xff, 5 | 6 | 8 | 10 | 13 | 14))
}

/// PostgreSQL cancellation and shutdown codes, plus connection exceptions (class 08).
fn is_unavailable_pg_code(code: &str) -> bool {
    matches!(code, "57014" | "57P01" | "57P02" | "57P03") || code.starts_with("08")
}

fn is_unavailable_db_error(db: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    let Some(code) = db.code() else {
        return false;
    };
    if db.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
        is_unavailable_sqlite_code(&code)
    } else {
        is_unavailable_pg_code(&code)
    }
}

impl From<sqlx::Error> for MetadataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_) => Self::StorageUnavailable(err.to_string()),
            sqlx::Error::Database(ref db) if is_unavailable_db_error(db.as_ref()) => {
                Self::StorageUnavailable(err.to_string())
            }
            other => Self::Database(other),
        }
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<partcache_core::Error> for MetadataError {
    fn from(err: partcache_core::Error) -> Self {
        match err {
            partcache_core::Error::Validation(msg) => Self::Validation(msg),
            partcache_core::Error::InvalidConfig(msg) => Self::Config(msg),
        }
    }
}

/// Result type for part cache operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
