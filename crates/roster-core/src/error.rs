//! # Error Types
//!
//! Domain-specific error types for roster-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  roster-core errors (this file)                                        │
//! │  ├── CoreError        - General roster domain errors                   │
//! │  └── ValidationError  - Account / input validation failures            │
//! │                                                                         │
//! │  roster-db errors (separate crate)                                     │
//! │  └── DbError          - Record cache failures                          │
//! │                                                                         │
//! │  roster-sync errors (separate crate)                                   │
//! │  └── SyncError        - Backend faults, pass failures                  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → operation-failed      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::{ClientType, MembershipList};

// =============================================================================
// Core Error
// =============================================================================

/// Roster domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The member role string is not one the membership service uses.
    #[error("Unknown member role: {0}")]
    UnknownMemberRole(String),

    /// The list has no backend member role (only Forward).
    #[error("{0} has no backend member role")]
    NoMemberRole(MembershipList),

    /// The numeric list bit is not a known membership list.
    #[error("Unknown membership list bit: {0}")]
    UnknownListBit(u8),

    /// The client type tag is not recognised.
    #[error("Unknown client type tag: {0}")]
    UnknownClientType(u32),

    /// One contact element does not fit in a membership payload on its own.
    #[error("Membership element for '{account}' is {size} bytes, over the payload limit")]
    PayloadTooLarge { account: String, size: usize },

    /// A persisted record could not be (de)serialized.
    #[error("Record serialization failed: {0}")]
    Serialization(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur before anything is encoded or sent, so a bad account never
/// reaches the live connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Account string is empty.
    #[error("Account must not be empty")]
    EmptyAccount,

    /// Account does not match the shape required by its client type.
    #[error("Invalid {client_type} account '{account}': {reason}")]
    InvalidAccount {
        account: String,
        client_type: ClientType,
        reason: String,
    },

    /// Group name is empty or too long.
    #[error("Invalid group name: {0}")]
    InvalidGroupName(String),
}

impl ValidationError {
    pub(crate) fn invalid_account(
        account: &str,
        client_type: ClientType,
        reason: impl Into<String>,
    ) -> Self {
        ValidationError::InvalidAccount {
            account: account.to_string(),
            client_type,
            reason: reason.into(),
        }
    }
}

/// Result alias for roster-core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::invalid_account("bob", ClientType::Email, "missing '@'");
        let msg = err.to_string();
        assert!(msg.contains("bob"));
        assert!(msg.contains("Email"));
        assert!(msg.contains("missing '@'"));
    }

    #[test]
    fn test_validation_wraps_into_core() {
        let err: CoreError = ValidationError::EmptyAccount.into();
        assert!(matches!(err, CoreError::Validation(ValidationError::EmptyAccount)));
    }
}
