//! # roster-core: Pure Roster Logic
//!
//! Contacts, membership lists, the roster snapshot and its merge rules, the
//! delta log, and the membership wire codec. Nothing in this crate performs
//! I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Roster Engine Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Application layer                            │   │
//! │  │    synchronize, add/remove contact to list, block, groups      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    roster-sync (engine)                         │   │
//! │  │    resolver, orchestrator, mutator, agent                      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ roster-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ snapshot  │  │   delta   │  │   codec   │  │   │
//! │  │   │  Contact  │  │  merge    │  │ fragments │  │  <ml> ≤   │  │   │
//! │  │   │  lists    │  │  markers  │  │ endpoints │  │ 7300 bytes│  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    roster-db (record cache)                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Contact, client types, membership lists and roles
//! - [`snapshot`] - Roster snapshot, server fragments, idempotent merge
//! - [`delta`] - Delta log and endpoint cache
//! - [`codec`] - Membership payload encoding
//! - [`error`] - Domain error types
//! - [`validation`] - Account and group-name checks
//!
//! ## Example Usage
//!
//! ```rust
//! use roster_core::{ClientType, MemberRole, MembershipList, RosterSnapshot};
//! use roster_core::snapshot::{MemberEntry, MembershipFragment, ServerFragment};
//!
//! let mut snapshot = RosterSnapshot::new();
//! let fragment = ServerFragment::Membership(MembershipFragment {
//!     members: vec![MemberEntry {
//!         account: "alice@example.com".into(),
//!         client_type: ClientType::Passport,
//!         role: MemberRole::Allow,
//!         membership_id: None,
//!         deleted: false,
//!     }],
//!     ..Default::default()
//! });
//!
//! snapshot.merge(&fragment);
//! let alice = snapshot.contact("alice@example.com", ClientType::Passport).unwrap();
//! assert!(alice.is_on(MembershipList::Allowed));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod codec;
pub mod delta;
pub mod error;
pub mod snapshot;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use codec::{encode_bulk, encode_memberships, BulkEncoding, MembershipTarget, MAX_PAYLOAD_BYTES};
pub use delta::{DeltaLog, EndpointEntry};
pub use error::{CoreError, CoreResult, ValidationError};
pub use snapshot::{RosterChange, RosterSnapshot, ServerFragment, VersionMarker};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Format version of the persisted roster snapshot.
///
/// A stored snapshot with any other version is discarded and refetched.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 3;

/// Format version of the persisted delta log.
pub const DELTA_LOG_SCHEMA_VERSION: u32 = 2;

/// Longest group name the address book accepts.
pub const MAX_GROUP_NAME_LEN: usize = 61;
