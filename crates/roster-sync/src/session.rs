//! # Session Context
//!
//! Everything one signed-in identity's engine shares: configuration, the
//! external seams, and the roster state behind a single mutex.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SessionContext                                  │
//! │                                                                         │
//! │  owner, config                                                         │
//! │  backend ─ connection ─ credentials ─ persistence ─ emitter            │
//! │                                                                         │
//! │  state: Mutex<RosterState>                                             │
//! │  ├── snapshot        (None until LoadLocal)                            │
//! │  ├── deltas          (fragments + endpoint cache)                      │
//! │  ├── phase                                                             │
//! │  ├── outstanding / early bulk acks                                     │
//! │  └── reverse contacts already notified                                 │
//! │                                                                         │
//! │  pass flag (one synchronization pass at a time)                        │
//! │  session watch (live session established?)                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The state lock is never held across a backend call, a live-connection
//! send, a persistence call, or an emit.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use roster_core::{DeltaLog, RosterSnapshot};

use crate::backend::RosterBackend;
use crate::config::EngineConfig;
use crate::connection::{LiveConnection, TransactionId};
use crate::credentials::CredentialProvider;
use crate::error::{SyncError, SyncResult};
use crate::events::{RosterEvent, RosterEventEmitter};
use crate::persistence::RosterPersistence;

// =============================================================================
// Sync Phase
// =============================================================================

/// Where the synchronization state machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    LoadLocal,
    MembershipSync,
    AddressBookSync,
    ApplyDefaults,
    AwaitingBulkAck,
    Synchronized,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::LoadLocal => "load_local",
            SyncPhase::MembershipSync => "membership_sync",
            SyncPhase::AddressBookSync => "address_book_sync",
            SyncPhase::ApplyDefaults => "apply_defaults",
            SyncPhase::AwaitingBulkAck => "awaiting_bulk_ack",
            SyncPhase::Synchronized => "synchronized",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Roster State
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct RosterState {
    pub snapshot: Option<RosterSnapshot>,
    pub deltas: DeltaLog,
    pub phase: SyncPhase,
    /// Bulk ADL transactions not yet acknowledged.
    pub outstanding_acks: HashSet<TransactionId>,
    /// Acks that arrived before their send was registered.
    pub early_acks: HashSet<TransactionId>,
    /// Contacts already reported through a reverse-relationship notification.
    pub notified_reverse: HashSet<String>,
    pub last_error: Option<String>,
}

impl RosterState {
    pub fn snapshot(&self) -> SyncResult<&RosterSnapshot> {
        self.snapshot.as_ref().ok_or(SyncError::NotLoaded)
    }

    pub fn snapshot_mut(&mut self) -> SyncResult<&mut RosterSnapshot> {
        self.snapshot.as_mut().ok_or(SyncError::NotLoaded)
    }
}

// =============================================================================
// Session Context
// =============================================================================

pub(crate) struct SessionContext {
    pub owner: String,
    pub config: Arc<EngineConfig>,
    pub state: Mutex<RosterState>,
    pub backend: Arc<dyn RosterBackend>,
    pub connection: Arc<dyn LiveConnection>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub persistence: Arc<dyn RosterPersistence>,
    pub emitter: Arc<dyn RosterEventEmitter>,
    session_tx: watch::Sender<bool>,
    pass_active: AtomicBool,
    closed: AtomicBool,
}

impl SessionContext {
    pub fn new(
        owner: String,
        config: Arc<EngineConfig>,
        backend: Arc<dyn RosterBackend>,
        connection: Arc<dyn LiveConnection>,
        credentials: Arc<dyn CredentialProvider>,
        persistence: Arc<dyn RosterPersistence>,
        emitter: Arc<dyn RosterEventEmitter>,
    ) -> Self {
        let (session_tx, _) = watch::channel(false);
        SessionContext {
            owner,
            config,
            state: Mutex::new(RosterState::default()),
            backend,
            connection,
            credentials,
            persistence,
            emitter,
            session_tx,
            pass_active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn emit(&self, event: RosterEvent) {
        debug!(owner = %self.owner, ?event, "Emitting roster event");
        self.emitter.emit(&event);
    }

    pub async fn set_phase(&self, phase: SyncPhase) {
        let mut state = self.state.lock().await;
        if state.phase != phase {
            info!(owner = %self.owner, from = %state.phase, to = %phase, "Sync phase transition");
            state.phase = phase;
        }
    }

    // -------------------------------------------------------------------------
    // Pass flag
    // -------------------------------------------------------------------------

    /// Claims the pass flag. The returned guard releases it on drop unless
    /// [`PassGuard::keep`] hands the release over to bulk-ack completion.
    pub fn begin_pass(&self) -> SyncResult<PassGuard<'_>> {
        self.ensure_open()?;
        if self
            .pass_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::SyncInProgress);
        }
        Ok(PassGuard { ctx: self, armed: true })
    }

    pub fn end_pass(&self) {
        self.pass_active.store(false, Ordering::Release);
    }

    pub fn pass_active(&self) -> bool {
        self.pass_active.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Live session
    // -------------------------------------------------------------------------

    pub fn set_session_established(&self, established: bool) {
        self.session_tx.send_replace(established);
    }

    pub fn session_established(&self) -> bool {
        *self.session_tx.borrow()
    }

    /// Waits until the live session is up, bounded by `timeout`.
    pub async fn wait_for_session(&self, timeout: Duration) -> SyncResult<()> {
        let mut rx = self.session_tx.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() {
                    return Ok::<(), SyncError>(());
                }
                rx.changed()
                    .await
                    .map_err(|_| SyncError::ChannelError("Session watch closed".into()))?;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::SessionTimeout(timeout.as_secs())),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn ensure_open(&self) -> SyncResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(SyncError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Saves the current delta log, endpoint cache included.
    pub async fn persist_deltas(&self) -> SyncResult<()> {
        let log = self.state.lock().await.deltas.clone();
        self.persistence.save_deltas(&self.owner, &log).await
    }
}

/// Pass-flag ownership for one synchronization pass.
pub(crate) struct PassGuard<'a> {
    ctx: &'a SessionContext,
    armed: bool,
}

impl PassGuard<'_> {
    /// Leaves the flag set after the guard is gone.
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ctx.end_pass();
        }
    }
}
