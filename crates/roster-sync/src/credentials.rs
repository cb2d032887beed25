//! # Credential Seam
//!
//! Ticket acquisition lives outside the engine. The resolver asks for the
//! current ticket before each call and for a renewed one after an
//! authentication fault on a membership mutation.

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Source of the signed-in session's service ticket.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The current ticket, or `None` when the session is not authenticated.
    async fn current_ticket(&self) -> Option<String>;

    /// Requests a fresh ticket. `None` if renewal is impossible.
    async fn renew_ticket(&self) -> Option<String>;
}

/// A fixed ticket, replaceable at runtime (sign-in after construction).
#[derive(Debug, Default)]
pub struct StaticCredentials {
    ticket: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(ticket: impl Into<String>) -> Self {
        StaticCredentials {
            ticket: RwLock::new(Some(ticket.into())),
        }
    }

    /// Credentials for a session that has not signed in.
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub async fn set_ticket(&self, ticket: Option<String>) {
        *self.ticket.write().await = ticket;
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn current_ticket(&self) -> Option<String> {
        self.ticket.read().await.clone()
    }

    async fn renew_ticket(&self) -> Option<String> {
        self.current_ticket().await
    }
}
