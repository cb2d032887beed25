//! # Validation Module
//!
//! Account and group-name checks applied before anything is encoded or sent
//! to the backend.
//!
//! ## Account Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Account Shapes                                     │
//! │                                                                         │
//! │  Passport / Email:   local@domain                                      │
//! │                      ├── local  → <c n="local" .../>                   │
//! │                      └── domain → <d n="domain"> group                 │
//! │                                                                         │
//! │  Phone:              +15551234                                         │
//! │                      └── number → <c n="tel:+15551234" .../> in <t>    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use roster_core::validation::split_account;
//! use roster_core::ClientType;
//!
//! let parts = split_account("alice@example.com", ClientType::Passport).unwrap();
//! assert_eq!(parts.local, "alice");
//! assert_eq!(parts.domain.as_deref(), Some("example.com"));
//! ```

use crate::error::ValidationError;
use crate::types::ClientType;
use crate::MAX_GROUP_NAME_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// An account split into the pieces the membership payload needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountParts {
    /// Local part, or the full number for phone accounts.
    pub local: String,
    /// Lowercased domain; `None` for phone accounts.
    pub domain: Option<String>,
}

// =============================================================================
// Account Validators
// =============================================================================

/// Splits an account into local part and domain.
///
/// ## Rules
/// - Must not be empty
/// - Passport/Email: exactly one `@`, non-empty local part, domain with a dot
/// - Phone: digits with an optional leading `+`
pub fn split_account(account: &str, client_type: ClientType) -> ValidationResult<AccountParts> {
    let account = account.trim();

    if account.is_empty() {
        return Err(ValidationError::EmptyAccount);
    }

    if client_type.is_phone() {
        let digits = account.strip_prefix('+').unwrap_or(account);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::invalid_account(
                account,
                client_type,
                "phone accounts must contain only digits",
            ));
        }
        return Ok(AccountParts {
            local: account.to_string(),
            domain: None,
        });
    }

    let (local, domain) = account
        .split_once('@')
        .ok_or_else(|| ValidationError::invalid_account(account, client_type, "missing '@'"))?;

    if local.is_empty() {
        return Err(ValidationError::invalid_account(account, client_type, "empty local part"));
    }
    if domain.contains('@') {
        return Err(ValidationError::invalid_account(account, client_type, "more than one '@'"));
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(ValidationError::invalid_account(account, client_type, "invalid domain"));
    }
    if account.chars().any(char::is_whitespace) {
        return Err(ValidationError::invalid_account(account, client_type, "contains whitespace"));
    }

    Ok(AccountParts {
        local: local.to_string(),
        domain: Some(domain.to_lowercase()),
    })
}

/// Validates an account without keeping the parts.
pub fn validate_account(account: &str, client_type: ClientType) -> ValidationResult<()> {
    split_account(account, client_type).map(|_| ())
}

/// Validates a contact group name.
pub fn validate_group_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::InvalidGroupName("must not be empty".to_string()));
    }

    if name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(ValidationError::InvalidGroupName(format!(
            "must be at most {} characters",
            MAX_GROUP_NAME_LEN
        )));
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_passport_account() {
        let parts = split_account("Bob.Smith@Example.COM", ClientType::Passport).unwrap();
        assert_eq!(parts.local, "Bob.Smith");
        assert_eq!(parts.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_split_phone_account() {
        let parts = split_account("+15551234", ClientType::Phone).unwrap();
        assert_eq!(parts.local, "+15551234");
        assert_eq!(parts.domain, None);

        assert!(split_account("555-1234", ClientType::Phone).is_err());
        assert!(split_account("+", ClientType::Phone).is_err());
    }

    #[test]
    fn test_rejects_malformed_accounts() {
        assert_eq!(
            split_account("   ", ClientType::Email),
            Err(ValidationError::EmptyAccount)
        );
        assert!(split_account("nobody", ClientType::Email).is_err());
        assert!(split_account("@example.com", ClientType::Email).is_err());
        assert!(split_account("a@b@example.com", ClientType::Email).is_err());
        assert!(split_account("a@localhost", ClientType::Passport).is_err());
        assert!(split_account("a b@example.com", ClientType::Passport).is_err());
    }

    #[test]
    fn test_validate_group_name() {
        assert!(validate_group_name("Friends").is_ok());
        assert!(validate_group_name("  ").is_err());
        assert!(validate_group_name(&"g".repeat(MAX_GROUP_NAME_LEN + 1)).is_err());
    }
}
