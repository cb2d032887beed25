//! # Address Book Agent
//!
//! Application-facing entry point for one signed-in identity. Owns the
//! session context, routes live-connection signals, and exposes the
//! synchronization and mutation operations.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     AddressBookAgent Architecture                       │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                       AddressBookAgent                           │  │
//! │  │                                                                  │  │
//! │  │  • synchronize / synchronize_forced                              │  │
//! │  │  • add / remove / block / unblock, groups                        │  │
//! │  │  • status, contact lookup, shutdown                              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ Arc<SessionContext>                    │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  Orchestrator  │  │    Mutator     │  │   Connection router    │    │
//! │  │  (sync pass)   │  │  (list edits)  │  │   (spawned task)       │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  Connection events: SessionEstablished, SessionClosed,                 │
//! │                     CommandAcknowledged(id)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use roster_core::{ClientType, Contact, MembershipList, OwnerSettings};
use roster_db::{Database, DbConfig};

use crate::backend::RosterBackend;
use crate::config::EngineConfig;
use crate::connection::{ConnectionEvent, LiveConnection};
use crate::credentials::CredentialProvider;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, RosterEventEmitter};
use crate::groups;
use crate::mutator::{self, MutationOutcome};
use crate::orchestrator::{self, PassOutcome};
use crate::persistence::RosterPersistence;
use crate::session::{SessionContext, SyncPhase};

// =============================================================================
// Roster Status
// =============================================================================

/// Point-in-time view of the engine for external queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterStatus {
    pub phase: SyncPhase,

    /// Bulk ADL transactions not yet acknowledged.
    pub outstanding_acks: usize,

    pub contacts: usize,
    pub groups: usize,
    pub session_established: bool,
    pub pass_active: bool,
    pub last_error: Option<String>,
}

// =============================================================================
// Address Book Agent
// =============================================================================

pub struct AddressBookAgent {
    ctx: Arc<SessionContext>,

    /// Shutdown sender for the connection router (set after start).
    shutdown_tx: Option<mpsc::Sender<()>>,

    router: Option<JoinHandle<()>>,
}

impl AddressBookAgent {
    fn new(ctx: SessionContext) -> Self {
        AddressBookAgent {
            ctx: Arc::new(ctx),
            shutdown_tx: None,
            router: None,
        }
    }

    pub fn owner(&self) -> &str {
        &self.ctx.owner
    }

    /// Spawns the router that feeds live-connection events into the session.
    pub fn start(&mut self, events: mpsc::Receiver<ConnectionEvent>) -> SyncResult<()> {
        self.ctx.ensure_open()?;
        if self.router.is_some() {
            return Err(SyncError::InvalidOperation("Agent already started".into()));
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.router = Some(tokio::spawn(Self::event_router(
            self.ctx.clone(),
            events,
            shutdown_rx,
        )));

        info!(owner = %self.ctx.owner, "Address book agent started");
        Ok(())
    }

    async fn event_router(
        ctx: Arc<SessionContext>,
        mut events: mpsc::Receiver<ConnectionEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        debug!(?event, "Routing connection event");
                        orchestrator::handle_event(&ctx, event).await;
                    }
                    None => {
                        info!("Connection event channel closed");
                        break;
                    }
                },

                _ = shutdown_rx.recv() => {
                    info!("Connection router received shutdown");
                    break;
                }
            }
        }

        info!("Connection router stopped");
    }

    /// Delivers one connection event directly, without the router.
    pub async fn handle_connection_event(&self, event: ConnectionEvent) {
        orchestrator::handle_event(&self.ctx, event).await;
    }

    // -------------------------------------------------------------------------
    // Synchronization
    // -------------------------------------------------------------------------

    /// Runs a synchronization pass. Completion after the bulk ADL is
    /// reported through the event emitter once the acknowledgments arrive.
    pub async fn synchronize(&self) -> SyncResult<PassOutcome> {
        orchestrator::run_pass(&self.ctx, false).await
    }

    /// Discards the local records (endpoint cache kept) and runs a full pass.
    pub async fn synchronize_forced(&self) -> SyncResult<PassOutcome> {
        orchestrator::run_pass(&self.ctx, true).await
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    pub async fn add_contact_to_list(
        &self,
        account: &str,
        client_type: ClientType,
        list: MembershipList,
    ) -> SyncResult<MutationOutcome> {
        mutator::add_to_list(&self.ctx, account, client_type, list).await
    }

    pub async fn remove_contact_from_list(
        &self,
        account: &str,
        client_type: ClientType,
        list: MembershipList,
    ) -> SyncResult<MutationOutcome> {
        mutator::remove_from_list(&self.ctx, account, client_type, list).await
    }

    /// Moves a contact to Blocked, leaving Allowed first if needed.
    pub async fn block_contact(&self, account: &str, client_type: ClientType) -> SyncResult<MutationOutcome> {
        mutator::block(&self.ctx, account, client_type).await
    }

    /// Moves a Blocked contact to Allowed.
    pub async fn unblock_contact(&self, account: &str, client_type: ClientType) -> SyncResult<MutationOutcome> {
        mutator::unblock(&self.ctx, account, client_type).await
    }

    pub async fn add_group(&self, name: &str) -> SyncResult<Uuid> {
        groups::add_group(&self.ctx, name).await
    }

    pub async fn remove_group(&self, id: Uuid) -> SyncResult<()> {
        groups::remove_group(&self.ctx, id).await
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn contact(&self, account: &str, client_type: ClientType) -> Option<Contact> {
        let state = self.ctx.state.lock().await;
        state
            .snapshot
            .as_ref()
            .and_then(|s| s.contact(account, client_type))
            .cloned()
    }

    /// Settings derived from the merged owner properties.
    pub async fn owner_settings(&self) -> Option<OwnerSettings> {
        let state = self.ctx.state.lock().await;
        state
            .snapshot
            .as_ref()
            .map(|s| OwnerSettings::from_properties(&s.owner_properties))
    }

    pub async fn status(&self) -> RosterStatus {
        let state = self.ctx.state.lock().await;
        let (contacts, groups) = state
            .snapshot
            .as_ref()
            .map(|s| (s.contacts.len(), s.groups.len()))
            .unwrap_or((0, 0));

        RosterStatus {
            phase: state.phase,
            outstanding_acks: state.outstanding_acks.len(),
            contacts,
            groups,
            session_established: self.ctx.session_established(),
            pass_active: self.ctx.pass_active(),
            last_error: state.last_error.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Stops the router, saves the snapshot and truncates the delta log.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!(owner = %self.ctx.owner, "Shutting down address book agent");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(router) = self.router.take() {
            if let Err(e) = router.await {
                warn!(error = %e, "Connection router ended abnormally");
            }
        }

        // the snapshot already holds every merged fragment
        let (snapshot, deltas) = {
            let mut state = self.ctx.state.lock().await;
            state.deltas.truncate();
            (state.snapshot.clone(), state.deltas.clone())
        };
        if let Some(snapshot) = snapshot {
            self.ctx.persistence.save_snapshot(&self.ctx.owner, &snapshot).await?;
        }
        self.ctx.persistence.save_deltas(&self.ctx.owner, &deltas).await?;

        self.ctx.close();
        info!(owner = %self.ctx.owner, "Address book agent stopped");
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating an AddressBookAgent.
pub struct AddressBookAgentBuilder {
    owner: String,
    config: EngineConfig,
    backend: Option<Arc<dyn RosterBackend>>,
    connection: Option<Arc<dyn LiveConnection>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    persistence: Option<Arc<dyn RosterPersistence>>,
    emitter: Option<Arc<dyn RosterEventEmitter>>,
}

impl AddressBookAgentBuilder {
    pub fn new(owner: impl Into<String>, config: EngineConfig) -> Self {
        AddressBookAgentBuilder {
            owner: owner.into(),
            config,
            backend: None,
            connection: None,
            credentials: None,
            persistence: None,
            emitter: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn RosterBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_connection(mut self, connection: Arc<dyn LiveConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn RosterPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Uses an opened SQLite cache for persistence.
    pub fn with_database(self, db: Arc<Database>) -> Self {
        self.with_persistence(db)
    }

    /// Opens the SQLite cache at the configured database path.
    pub async fn with_configured_database(self) -> SyncResult<Self> {
        let path = self
            .config
            .database_path()
            .ok_or_else(|| SyncError::InvalidConfig("No database path available".into()))?;
        info!(path = %path.display(), "Opening roster cache");
        let db = Database::new(DbConfig::new(path)).await?;
        Ok(self.with_database(Arc::new(db)))
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn RosterEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn build(self) -> SyncResult<AddressBookAgent> {
        self.config.validate()?;
        if self.owner.trim().is_empty() {
            return Err(SyncError::InvalidConfig("Owner account required".into()));
        }

        let backend = self
            .backend
            .ok_or_else(|| SyncError::InvalidConfig("Backend required".into()))?;
        let connection = self
            .connection
            .ok_or_else(|| SyncError::InvalidConfig("Live connection required".into()))?;
        let credentials = self
            .credentials
            .ok_or_else(|| SyncError::InvalidConfig("Credential provider required".into()))?;
        let persistence = self
            .persistence
            .ok_or_else(|| SyncError::InvalidConfig("Persistence required".into()))?;
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(AddressBookAgent::new(SessionContext::new(
            self.owner,
            Arc::new(self.config),
            backend,
            connection,
            credentials,
            persistence,
            emitter,
        )))
    }
}
