//! Scripted seams and a session harness for the engine's unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use roster_core::snapshot::{AddressBookContact, AddressBookFragment, MemberEntry, MembershipFragment};
use roster_core::{ClientType, DeltaLog, MemberRole, OwnerSettings, VersionMarker};

use crate::agent::{AddressBookAgent, AddressBookAgentBuilder};
use crate::backend::{BackendRequest, BackendResponse, Endpoint, RosterBackend, ServiceFault, ServiceMethod};
use crate::config::EngineConfig;
use crate::connection::{LiveConnection, MembershipCommand, TransactionId};
use crate::credentials::CredentialProvider;
use crate::error::SyncResult;
use crate::events::{RosterEvent, RosterEventEmitter};
use crate::persistence::MemoryPersistence;
use crate::session::SessionContext;

pub(crate) const OWNER: &str = "owner@example.com";

pub(crate) fn member(account: &str, role: MemberRole) -> MemberEntry {
    MemberEntry {
        account: account.to_string(),
        client_type: ClientType::Passport,
        role,
        membership_id: Some(format!("{}-{}", role, account)),
        deleted: false,
    }
}

/// Address book fragment listing `accounts` as messenger contacts.
pub(crate) fn address_book(accounts: &[&str], last_change: VersionMarker) -> AddressBookFragment {
    AddressBookFragment {
        contacts: accounts
            .iter()
            .map(|account| AddressBookContact {
                id: Uuid::new_v4(),
                account: account.to_string(),
                client_type: ClientType::Passport,
                display_name: None,
                is_messenger_user: true,
                group_ids: Vec::new(),
                deleted: false,
            })
            .collect(),
        last_change,
        ..AddressBookFragment::default()
    }
}

// =============================================================================
// Backend
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub endpoint: Endpoint,
    pub ticket: String,
    pub request: BackendRequest,
}

/// Answers from per-method queues, falling back to an empty success.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    script: Mutex<HashMap<ServiceMethod, VecDeque<Result<BackendResponse, ServiceFault>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn fail(&self, method: ServiceMethod, fault: ServiceFault) {
        self.push(method, Err(fault));
    }

    pub fn respond(&self, method: ServiceMethod, response: BackendResponse) {
        self.push(method, Ok(response));
    }

    fn push(&self, method: ServiceMethod, result: Result<BackendResponse, ServiceFault>) {
        self.script
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.calls().into_iter().map(|c| c.request).collect()
    }

    /// Requests issued for one method, in order.
    pub fn requests_for(&self, method: ServiceMethod) -> Vec<BackendRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method() == method)
            .collect()
    }

    fn default_response(method: ServiceMethod) -> BackendResponse {
        match method {
            ServiceMethod::FindMembership => BackendResponse::Membership(MembershipFragment::default()),
            ServiceMethod::AbFindAll => BackendResponse::AddressBook(AddressBookFragment::default()),
            ServiceMethod::AddMember => BackendResponse::MemberAdded { membership_id: None },
            ServiceMethod::AbGroupAdd => BackendResponse::GroupAdded { id: Uuid::new_v4() },
            _ => BackendResponse::Done,
        }
    }
}

#[async_trait]
impl RosterBackend for ScriptedBackend {
    async fn call(
        &self,
        endpoint: &Endpoint,
        ticket: &str,
        request: &BackendRequest,
    ) -> Result<BackendResponse, ServiceFault> {
        self.calls.lock().unwrap().push(RecordedCall {
            endpoint: endpoint.clone(),
            ticket: ticket.to_string(),
            request: request.clone(),
        });

        let method = request.method();
        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(&method)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| Ok(Self::default_response(method)))
    }
}

// =============================================================================
// Live Connection
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingConnection {
    sent: Mutex<Vec<(MembershipCommand, String)>>,
    settings: Mutex<Vec<OwnerSettings>>,
    next_id: AtomicU32,
}

impl RecordingConnection {
    pub fn sent(&self) -> Vec<(MembershipCommand, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn settings_applied(&self) -> usize {
        self.settings.lock().unwrap().len()
    }

    pub fn last_settings(&self) -> Option<OwnerSettings> {
        self.settings.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LiveConnection for RecordingConnection {
    async fn send_command(&self, command: MembershipCommand, payload: &str) -> SyncResult<TransactionId> {
        self.sent.lock().unwrap().push((command, payload.to_string()));
        Ok(TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn apply_owner_settings(&self, settings: &OwnerSettings) -> SyncResult<()> {
        self.settings.lock().unwrap().push(settings.clone());
        Ok(())
    }
}

// =============================================================================
// Credentials
// =============================================================================

pub(crate) struct CountingCredentials {
    ticket: Option<String>,
    renewals: AtomicUsize,
}

impl CountingCredentials {
    pub fn renewals(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingCredentials {
    async fn current_ticket(&self) -> Option<String> {
        self.ticket.clone()
    }

    async fn renew_ticket(&self) -> Option<String> {
        let n = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
        self.ticket.as_ref().map(|_| format!("t=renewed-{}", n))
    }
}

// =============================================================================
// Emitter
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingEmitter {
    events: Mutex<Vec<RosterEvent>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<RosterEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(operation, detail)` of every operation-failed notification.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RosterEvent::OperationFailed { operation, detail } => Some((operation, detail)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl RosterEventEmitter for RecordingEmitter {
    fn emit(&self, event: &RosterEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// =============================================================================
// Harness
// =============================================================================

pub(crate) struct Harness {
    pub config: Arc<EngineConfig>,
    pub backend: Arc<ScriptedBackend>,
    pub connection: Arc<RecordingConnection>,
    pub credentials: Arc<CountingCredentials>,
    pub persistence: Arc<MemoryPersistence>,
    pub emitter: Arc<RecordingEmitter>,
    ctx: Arc<SessionContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Some("t=ticket".into()), None)
    }

    pub fn signed_out() -> Self {
        Self::build(None, None)
    }

    /// Every method already has an endpoint cache entry.
    pub fn resolved() -> Self {
        let mut deltas = DeltaLog::new();
        for method in ServiceMethod::ALL {
            deltas.record_endpoint(method.name(), None, None);
        }
        Self::build(Some("t=ticket".into()), Some(deltas))
    }

    fn build(ticket: Option<String>, deltas: Option<DeltaLog>) -> Self {
        let config = Arc::new(EngineConfig::default());
        let backend = Arc::new(ScriptedBackend::default());
        let connection = Arc::new(RecordingConnection::default());
        let credentials = Arc::new(CountingCredentials {
            ticket,
            renewals: AtomicUsize::new(0),
        });
        let emitter = Arc::new(RecordingEmitter::default());
        let persistence = Arc::new(match &deltas {
            Some(log) => MemoryPersistence::with_deltas(OWNER, log.clone()),
            None => MemoryPersistence::new(),
        });

        let ctx = Arc::new(SessionContext::new(
            OWNER.to_string(),
            config.clone(),
            backend.clone(),
            connection.clone(),
            credentials.clone(),
            persistence.clone(),
            emitter.clone(),
        ));
        if let Some(log) = deltas {
            ctx.state
                .try_lock()
                .expect("fresh session state is unlocked")
                .deltas = log;
        }

        Harness {
            config,
            backend,
            connection,
            credentials,
            persistence,
            emitter,
            ctx,
        }
    }

    pub fn context(&self) -> Arc<SessionContext> {
        self.ctx.clone()
    }

    /// Agent builder over the harness seams, with its own session.
    pub fn builder(&self) -> AddressBookAgentBuilder {
        AddressBookAgentBuilder::new(OWNER, (*self.config).clone())
            .with_backend(self.backend.clone())
            .with_connection(self.connection.clone())
            .with_credentials(self.credentials.clone())
            .with_persistence(self.persistence.clone())
            .with_emitter(self.emitter.clone())
    }

    pub fn agent(&self) -> AddressBookAgent {
        self.builder()
            .build()
            .expect("harness agent builds")
    }
}

/// Seeds a synchronized-looking roster into the session without a pass.
pub(crate) async fn load_roster(ctx: &SessionContext, members: Vec<MemberEntry>, forward: &[&str]) {
    let mut snapshot = roster_core::RosterSnapshot::new();
    snapshot.merge(&roster_core::ServerFragment::Membership(MembershipFragment {
        members,
        last_change: VersionMarker::NEVER,
    }));
    snapshot.merge(&roster_core::ServerFragment::AddressBook(address_book(
        forward,
        VersionMarker::NEVER,
    )));
    ctx.state.lock().await.snapshot = Some(snapshot);
}

