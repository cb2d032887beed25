//! # roster-sync: Address Book Synchronization Engine
//!
//! Keeps a signed-in identity's local roster consistent with the sharing
//! (membership) and address book services, and mirrors list memberships
//! onto the live protocol connection.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Address Book Engine                                │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │              AddressBookAgent (one per identity)                 │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  Orchestrator  │  │    Mutator     │  │   Groups               │    │
//! │  │                │  │                │  │                        │    │
//! │  │ LoadLocal →    │  │ add / remove   │  │ ABGroupAdd             │    │
//! │  │ fetches →      │  │ block/unblock  │  │ ABGroupDelete          │    │
//! │  │ bulk ADL →     │  │                │  │                        │    │
//! │  │ Synchronized   │  │                │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          └───────────────────┼───────────────────────┘                 │
//! │                              ▼                                          │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  Endpoint Resolver: cache, discovery, rate limit, ticket renewal │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                              │                                          │
//! │       RosterBackend · LiveConnection · CredentialProvider              │
//! │       RosterPersistence (SQLite / memory) · RosterEventEmitter         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `AddressBookAgent` and its builder
//! - [`backend`] - Backend request/response/fault model and the `RosterBackend` seam
//! - [`config`] - Engine configuration (service URLs, retry bounds, storage)
//! - [`connection`] - Live connection seam and its events
//! - [`credentials`] - Ticket provider seam
//! - [`error`] - Sync error types
//! - [`events`] - Application-facing notifications
//! - [`mutator`] - Single-contact list mutations
//! - [`orchestrator`] - The synchronization pass
//! - [`persistence`] - Snapshot and delta log storage seam
//! - [`session`] - Per-identity shared state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roster_sync::{AddressBookAgentBuilder, EngineConfig};
//!
//! let config = EngineConfig::load_or_default(None);
//! let mut agent = AddressBookAgentBuilder::new("me@example.com", config)
//!     .with_backend(backend)
//!     .with_connection(connection)
//!     .with_credentials(credentials)
//!     .with_configured_database()
//!     .await?
//!     .build()?;
//!
//! agent.start(connection_events)?;
//! agent.synchronize().await?;
//! agent.block_contact("pest@example.com", ClientType::Passport).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod backend;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod events;
mod groups;
pub mod mutator;
pub mod orchestrator;
pub mod persistence;
mod resolver;
pub mod session;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AddressBookAgent, AddressBookAgentBuilder, RosterStatus};
pub use backend::{
    BackendRequest, BackendResponse, Endpoint, FaultKind, RosterBackend, ServiceFault, ServiceKind,
    ServiceMethod,
};
pub use config::{EngineConfig, MutationSettings, RetrySettings, ServiceSettings, StorageSettings, SyncSettings};
pub use connection::{ConnectionEvent, LiveConnection, MembershipCommand, TransactionId};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use error::{SyncError, SyncResult};
pub use events::{ChannelEmitter, NoOpEmitter, RosterEvent, RosterEventEmitter};
pub use mutator::MutationOutcome;
pub use orchestrator::PassOutcome;
pub use persistence::{MemoryPersistence, RosterPersistence};
pub use session::SyncPhase;
