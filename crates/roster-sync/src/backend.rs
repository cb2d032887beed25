//! # Backend RPC Seam
//!
//! Request, response and fault shapes of the membership (sharing) and
//! address book services, plus the [`RosterBackend`] trait the engine calls
//! them through.
//!
//! ## Service Methods
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Backend Service Methods                            │
//! │                                                                         │
//! │  Sharing service            │  Address book service                    │
//! │  ─────────────────          │  ────────────────────                    │
//! │  FindMembership  (fetch)    │  ABFindAll      (fetch)                  │
//! │  AddMember       (mutation) │  ABAdd          (create roster)          │
//! │  DeleteMember    (mutation) │  ABGroupAdd     (group)                  │
//! │                             │  ABGroupDelete  (group)                  │
//! │                                                                         │
//! │  Every call carries the caller's ticket and an auth-cache token, and   │
//! │  is addressed to a host the Endpoint Resolver may have rewritten.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use roster_core::snapshot::{AddressBookFragment, MembershipFragment};
use roster_core::{ClientType, MemberRole, VersionMarker};

// =============================================================================
// Service Methods
// =============================================================================

/// Which remote service a method belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Sharing,
    AddressBook,
}

/// A backend operation. The name doubles as the endpoint cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceMethod {
    FindMembership,
    AddMember,
    DeleteMember,
    AbFindAll,
    AbAdd,
    AbGroupAdd,
    AbGroupDelete,
}

impl ServiceMethod {
    pub const ALL: [ServiceMethod; 7] = [
        ServiceMethod::FindMembership,
        ServiceMethod::AddMember,
        ServiceMethod::DeleteMember,
        ServiceMethod::AbFindAll,
        ServiceMethod::AbAdd,
        ServiceMethod::AbGroupAdd,
        ServiceMethod::AbGroupDelete,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            ServiceMethod::FindMembership => "FindMembership",
            ServiceMethod::AddMember => "AddMember",
            ServiceMethod::DeleteMember => "DeleteMember",
            ServiceMethod::AbFindAll => "ABFindAll",
            ServiceMethod::AbAdd => "ABAdd",
            ServiceMethod::AbGroupAdd => "ABGroupAdd",
            ServiceMethod::AbGroupDelete => "ABGroupDelete",
        }
    }

    pub const fn service(&self) -> ServiceKind {
        match self {
            ServiceMethod::FindMembership | ServiceMethod::AddMember | ServiceMethod::DeleteMember => {
                ServiceKind::Sharing
            }
            _ => ServiceKind::AddressBook,
        }
    }

    /// Membership mutations get their ticket renewed on authentication faults.
    pub const fn is_mutation(&self) -> bool {
        matches!(self, ServiceMethod::AddMember | ServiceMethod::DeleteMember)
    }
}

impl fmt::Display for ServiceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where and how a single call is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: ServiceMethod,
    pub url: Url,
    pub auth_cache_token: Option<String>,
}

// =============================================================================
// Requests & Responses
// =============================================================================

/// A backend request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRequest {
    FindMembership {
        deltas_only: bool,
        since: VersionMarker,
    },
    AddMember {
        account: String,
        client_type: ClientType,
        role: MemberRole,
    },
    DeleteMember {
        account: String,
        client_type: ClientType,
        role: MemberRole,
        membership_id: Option<String>,
    },
    FindAddressBook {
        deltas_only: bool,
        since: VersionMarker,
        dynamic_since: VersionMarker,
    },
    CreateAddressBook {
        owner: String,
    },
    AddGroup {
        name: String,
    },
    DeleteGroup {
        id: Uuid,
    },
}

impl BackendRequest {
    pub const fn method(&self) -> ServiceMethod {
        match self {
            BackendRequest::FindMembership { .. } => ServiceMethod::FindMembership,
            BackendRequest::AddMember { .. } => ServiceMethod::AddMember,
            BackendRequest::DeleteMember { .. } => ServiceMethod::DeleteMember,
            BackendRequest::FindAddressBook { .. } => ServiceMethod::AbFindAll,
            BackendRequest::CreateAddressBook { .. } => ServiceMethod::AbAdd,
            BackendRequest::AddGroup { .. } => ServiceMethod::AbGroupAdd,
            BackendRequest::DeleteGroup { .. } => ServiceMethod::AbGroupDelete,
        }
    }
}

/// A successful backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendResponse {
    Membership(MembershipFragment),
    AddressBook(AddressBookFragment),
    MemberAdded { membership_id: Option<String> },
    GroupAdded { id: Uuid },
    Done,
}

// =============================================================================
// Faults
// =============================================================================

/// How the engine reacts to a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The owner has no address book yet.
    RosterMissing,
    /// The delta base is no longer valid.
    NeedsFullResync,
    AuthenticationFailed,
    RateLimited,
    /// Add of a membership the service already has.
    AlreadyExists,
    /// Delete of a membership the service does not have.
    DoesNotExist,
    Other,
}

/// A fault returned by a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFault {
    /// Fault code (e.g. `ABDoesNotExist`).
    pub code: String,

    /// Human-readable fault string.
    pub message: String,

    /// Raw fault detail document, which may name a preferred host and a
    /// cache key for the method.
    #[serde(default)]
    pub detail: Option<String>,
}

impl ServiceFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceFault {
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Classifies the fault by its code first, then its message text.
    pub fn kind(&self) -> FaultKind {
        match self.code.as_str() {
            "ABDoesNotExist" => return FaultKind::RosterMissing,
            "FullSyncRequired" => return FaultKind::NeedsFullResync,
            "AuthenticationFailed" | "PassportAuthFail" | "TicketExpired" => {
                return FaultKind::AuthenticationFailed
            }
            "SenderThrottleLimitExceeded" | "ThrottleLimitExceeded" => {
                return FaultKind::RateLimited
            }
            "MemberAlreadyExists" => return FaultKind::AlreadyExists,
            "MemberDoesNotExist" => return FaultKind::DoesNotExist,
            _ => {}
        }

        let message = self.message.to_lowercase();
        if message.contains("address book does not exist") {
            FaultKind::RosterMissing
        } else if message.contains("need to do full sync") {
            FaultKind::NeedsFullResync
        } else if message.contains("member already exists") {
            FaultKind::AlreadyExists
        } else if message.contains("member does not exist") {
            FaultKind::DoesNotExist
        } else if message.contains("throttle") || message.contains("rate limit") {
            FaultKind::RateLimited
        } else if message.contains("authentication failed") {
            FaultKind::AuthenticationFailed
        } else {
            FaultKind::Other
        }
    }

    /// Extracts `(cache key, preferred host)` from the fault detail. Either
    /// may be missing independently; empty values count as missing.
    pub fn endpoint_hints(&self) -> (Option<String>, Option<String>) {
        let Some(detail) = self.detail.as_deref() else {
            return (None, None);
        };
        (
            element_text(detail, "CacheKey"),
            element_text(detail, "PreferredHostName"),
        )
    }
}

impl fmt::Display for ServiceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Text of the first `<name>` element, matched without regard to case or
/// namespace prefix.
fn element_text(document: &str, name: &str) -> Option<String> {
    let lower = document.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();

    let mut search = 0;
    while let Some(found) = lower[search..].find('<') {
        let tag_start = search + found + 1;
        let tag_end = tag_start + lower[tag_start..].find('>')?;
        let tag = &lower[tag_start..tag_end];
        search = tag_end + 1;

        if tag.starts_with('/') || tag.ends_with('/') {
            continue;
        }
        let local = tag
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .rsplit(':')
            .next()
            .unwrap_or_default();
        if local != name {
            continue;
        }

        let close = lower[search..].find("</")?;
        let text = document[search..search + close].trim();
        return (!text.is_empty()).then(|| text.to_string());
    }
    None
}

// =============================================================================
// Backend Trait
// =============================================================================

/// The remote membership and address book services.
///
/// Implementations perform one call per invocation; retry, discovery and
/// ticket renewal are the Endpoint Resolver's job.
#[async_trait]
pub trait RosterBackend: Send + Sync {
    async fn call(
        &self,
        endpoint: &Endpoint,
        ticket: &str,
        request: &BackendRequest,
    ) -> Result<BackendResponse, ServiceFault>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kind_from_message() {
        let fault = ServiceFault::new("soap:Client", "Address Book Does Not Exist");
        assert_eq!(fault.kind(), FaultKind::RosterMissing);

        let fault = ServiceFault::new("soap:Client", "Need to do full sync. Can't sync deltas");
        assert_eq!(fault.kind(), FaultKind::NeedsFullResync);

        assert_eq!(
            ServiceFault::new("soap:Client", "Member already exists").kind(),
            FaultKind::AlreadyExists
        );
        assert_eq!(
            ServiceFault::new("soap:Client", "Member does not exist").kind(),
            FaultKind::DoesNotExist
        );
        assert_eq!(ServiceFault::new("soap:Server", "boom").kind(), FaultKind::Other);
    }

    #[test]
    fn test_fault_kind_from_code() {
        assert_eq!(
            ServiceFault::new("SenderThrottleLimitExceeded", "slow down").kind(),
            FaultKind::RateLimited
        );
        assert_eq!(
            ServiceFault::new("AuthenticationFailed", "ticket rejected").kind(),
            FaultKind::AuthenticationFailed
        );
    }

    #[test]
    fn test_endpoint_hints() {
        let fault = ServiceFault::new("soap:Client", "redirect").with_detail(
            "<soap:Envelope><detail><ns:PreferredHostName>bay.contacts.example.com\
             </ns:PreferredHostName><CacheKey>14r2;abc</CacheKey></detail></soap:Envelope>",
        );
        assert_eq!(
            fault.endpoint_hints(),
            (Some("14r2;abc".into()), Some("bay.contacts.example.com".into()))
        );
    }

    #[test]
    fn test_endpoint_hints_partial_or_missing() {
        let token_only = ServiceFault::new("x", "y").with_detail("<CacheKey>k</CacheKey>");
        assert_eq!(token_only.endpoint_hints(), (Some("k".into()), None));

        let empty_host = ServiceFault::new("x", "y")
            .with_detail("<PreferredHostName> </PreferredHostName>");
        assert_eq!(empty_host.endpoint_hints(), (None, None));

        let garbage = ServiceFault::new("x", "y").with_detail("<<<not xml");
        assert_eq!(garbage.endpoint_hints(), (None, None));

        assert_eq!(ServiceFault::new("x", "y").endpoint_hints(), (None, None));
    }

    #[test]
    fn test_method_routing() {
        assert_eq!(ServiceMethod::AddMember.service(), ServiceKind::Sharing);
        assert_eq!(ServiceMethod::AbFindAll.service(), ServiceKind::AddressBook);
        assert!(ServiceMethod::DeleteMember.is_mutation());
        assert!(!ServiceMethod::FindMembership.is_mutation());
        assert_eq!(
            BackendRequest::CreateAddressBook { owner: "a@b.c".into() }.method().name(),
            "ABAdd"
        );
    }
}
