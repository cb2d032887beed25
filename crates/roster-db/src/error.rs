//! # Database Error Types
//!
//! Error types for record cache operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        Stored record is stale              │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  DbError (this module)  ◄───────  DbError::SchemaMismatch              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (roster-sync)  ← SchemaMismatch becomes VersionMismatch     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Orchestrator discards the records and refetches                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Record cache errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored record was written by an engine with a different format.
    ///
    /// ## When This Occurs
    /// - The engine was upgraded and the record format changed
    /// - A record was written by a newer build and then downgraded
    #[error("{record} schema version {found} does not match expected {expected}")]
    SchemaMismatch {
        record: &'static str,
        expected: u32,
        found: u32,
    },

    /// A stored payload could not be decoded, or a record could not be encoded.
    #[error("Corrupt {record} payload: {message}")]
    CorruptRecord {
        record: &'static str,
        message: String,
    },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn corrupt(record: &'static str, err: impl std::fmt::Display) -> Self {
        DbError::CorruptRecord {
            record,
            message: err.to_string(),
        }
    }

    /// Whether the stored record should be discarded rather than retried.
    ///
    /// Stale and undecodable records are both recovered from by a full
    /// refetch.
    pub fn is_stale_record(&self) -> bool {
        matches!(
            self,
            DbError::SchemaMismatch { .. } | DbError::CorruptRecord { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → DbError::QueryFailed
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) => DbError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),
            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
