//! Error types for storage operations

use chrono::{DateTime, Utc};

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The store could not be reached (closed pool, lost connection, ...)
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// A query reached the store but failed
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// An append whose timestamp is not after the entity's latest snapshot
    #[error("snapshot for {entity_id} at {timestamp} is not after the latest stored snapshot")]
    TimestampConflict {
        entity_id: String,
        timestamp: DateTime<Utc>,
    },

    #[error("database migration failed: {0}")]
    MigrationFailed(String),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot document could not be encoded or decoded
    #[error("snapshot serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this failure means the store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Io(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::Io(io_err),
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                StorageError::Unavailable(err.to_string())
            }
            sqlx::Error::RowNotFound => StorageError::QueryFailed("no rows found".to_string()),
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
