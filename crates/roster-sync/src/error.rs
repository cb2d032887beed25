//! # Sync Error Types
//!
//! Error types for synchronization passes and membership mutations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Backend      │  │     Session State       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Fault          │  │  VersionMismatch        │ │
//! │  │  InvalidUrl     │  │  NoAccessRight  │  │  SyncInProgress         │ │
//! │  │  ConfigLoad/Save│  │  RetriesExhaust.│  │  NotLoaded              │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │   Persistence   │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  DatabaseError  │  │  Core           │                              │
//! │  │                 │  │  ChannelError   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use roster_core::{CoreError, ValidationError};
use roster_db::DbError;

use crate::backend::{FaultKind, ServiceFault};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all engine failures.
///
/// Backend faults that the engine reconciles (already-exists, does-not-exist)
/// never surface as errors; anything that does surface carries the name of
/// the operation that failed.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Invalid service URL.
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// A backend call returned a fault the engine does not handle.
    #[error("{operation} failed: {fault}")]
    Fault {
        operation: String,
        fault: ServiceFault,
    },

    /// No ticket is available for the session.
    #[error("{operation} failed: session is not authenticated")]
    NoAccessRight { operation: String },

    /// A bounded retry loop ran out of attempts.
    #[error("{operation} failed after {attempts} attempt(s)")]
    RetriesExhausted { operation: String, attempts: u32 },

    // =========================================================================
    // Session State Errors
    // =========================================================================
    /// A persisted record is stale or unreadable.
    #[error("Version mismatch: {0}")]
    VersionMismatch(String),

    /// A synchronization pass is already running.
    #[error("A synchronization pass is already in progress")]
    SyncInProgress,

    /// The roster has not been loaded yet.
    #[error("Roster not loaded; run synchronize() first")]
    NotLoaded,

    /// No contact with the given key.
    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    /// The requested mutation is not allowed.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The live session did not come up in time.
    #[error("Session not established after {0} seconds")]
    SessionTimeout(u64),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Record cache failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Domain error from roster-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failed to serialize state.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Agent is shutting down.
    #[error("Address book agent is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        if err.is_stale_record() {
            SyncError::VersionMismatch(err.to_string())
        } else {
            SyncError::DatabaseError(err.to_string())
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Core(CoreError::from(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    pub fn fault(operation: impl Into<String>, fault: ServiceFault) -> Self {
        SyncError::Fault {
            operation: operation.into(),
            fault,
        }
    }

    /// Returns true if a later attempt may succeed without intervention.
    ///
    /// ## Retryable Errors
    /// - Rate-limited backend faults
    /// - Exhausted bounded retries
    /// - Session timeouts
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Fault { fault, .. } => fault.kind() == FaultKind::RateLimited,
            SyncError::RetriesExhausted { .. }
            | SyncError::SessionTimeout(_)
            | SyncError::SyncInProgress => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// The operation name carried by backend errors.
    pub fn operation(&self) -> Option<&str> {
        match self {
            SyncError::Fault { operation, .. }
            | SyncError::NoAccessRight { operation }
            | SyncError::RetriesExhausted { operation, .. } => Some(operation),
            _ => None,
        }
    }
}
