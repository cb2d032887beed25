//! # Roster Events
//!
//! Notifications the engine raises toward the application layer.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Roster Event Flow                                │
//! │                                                                         │
//! │  merge / mutation / pass outcome                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  RosterEvent ──► Arc<dyn RosterEventEmitter>                           │
//! │                    ├── NoOpEmitter       (default)                     │
//! │                    └── ChannelEmitter    (mpsc to the application)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use roster_core::{MembershipList, RosterChange};

use crate::error::SyncError;

/// An application-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RosterEvent {
    ContactAdded { key: String, list: MembershipList },
    ContactRemoved { key: String, list: MembershipList },
    /// A contact put the owner on its own list.
    ReverseAdded { key: String },
    ReverseRemoved { key: String },
    GroupAdded { id: Uuid, name: String },
    GroupRemoved { id: Uuid, name: String },
    SynchronizationCompleted,
    OperationFailed { operation: String, detail: String },
}

impl RosterEvent {
    /// Operation-failed notification for a surfaced error.
    pub fn failed(operation: impl Into<String>, err: &SyncError) -> Self {
        let detail = match err {
            SyncError::Fault { fault, .. } => fault
                .detail
                .clone()
                .unwrap_or_else(|| fault.to_string()),
            other => other.to_string(),
        };
        RosterEvent::OperationFailed {
            operation: operation.into(),
            detail,
        }
    }
}

impl From<RosterChange> for RosterEvent {
    fn from(change: RosterChange) -> Self {
        match change {
            RosterChange::ContactAdded { key, list } => RosterEvent::ContactAdded { key, list },
            RosterChange::ContactRemoved { key, list } => RosterEvent::ContactRemoved { key, list },
            RosterChange::ReverseAdded { key } => RosterEvent::ReverseAdded { key },
            RosterChange::ReverseRemoved { key } => RosterEvent::ReverseRemoved { key },
            RosterChange::GroupAdded { id, name } => RosterEvent::GroupAdded { id, name },
            RosterChange::GroupRemoved { id, name } => RosterEvent::GroupRemoved { id, name },
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives roster events. Called with the session lock released.
pub trait RosterEventEmitter: Send + Sync {
    fn emit(&self, event: &RosterEvent);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl RosterEventEmitter for NoOpEmitter {
    fn emit(&self, _event: &RosterEvent) {}
}

/// Forwards events into a tokio channel.
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<RosterEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RosterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelEmitter { tx }, rx)
    }
}

impl RosterEventEmitter for ChannelEmitter {
    fn emit(&self, event: &RosterEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!("Roster event receiver dropped");
        }
    }
}
