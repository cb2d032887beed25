//! # Live Connection Seam
//!
//! The engine only needs two commands of the live protocol connection
//! (membership add and remove), the owner-settings push, and three signals
//! coming back from it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Live Connection Traffic                            │
//! │                                                                         │
//! │   engine ──► send_command(ADL | RML, payload) ──► TransactionId        │
//! │   engine ──► apply_owner_settings(settings)                            │
//! │                                                                         │
//! │   connection ──► SessionEstablished      gates the bulk ADL            │
//! │   connection ──► CommandAcknowledged(id) counts down bulk acks         │
//! │   connection ──► SessionClosed                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use roster_core::OwnerSettings;

use crate::error::SyncResult;

/// Protocol transaction identifier assigned to a sent command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u32);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Membership commands of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipCommand {
    /// Adds list memberships (`ADL`).
    Add,
    /// Removes list memberships (`RML`).
    Remove,
}

impl MembershipCommand {
    pub const fn wire_name(&self) -> &'static str {
        match self {
            MembershipCommand::Add => "ADL",
            MembershipCommand::Remove => "RML",
        }
    }
}

impl fmt::Display for MembershipCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Signals delivered by the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    SessionEstablished,
    SessionClosed,
    CommandAcknowledged(TransactionId),
}

/// The live protocol connection.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    /// Frames and sends a membership command, returning its transaction id.
    async fn send_command(
        &self,
        command: MembershipCommand,
        payload: &str,
    ) -> SyncResult<TransactionId>;

    /// Pushes the owner's privacy settings to the presence state.
    async fn apply_owner_settings(&self, settings: &OwnerSettings) -> SyncResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(MembershipCommand::Add.to_string(), "ADL");
        assert_eq!(MembershipCommand::Remove.to_string(), "RML");
        assert_eq!(TransactionId(7).to_string(), "7");
    }
}
