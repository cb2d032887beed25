//! # Synchronization Orchestrator
//!
//! Drives one synchronization pass as an explicit loop over [`SyncPhase`]
//! with bounded retry counters.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Synchronization Pass                               │
//! │                                                                         │
//! │   Idle                                                                 │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │   LoadLocal ◄──────────── stale/failed load: discard, reload (bounded) │
//! │    │   replay cached delta fragments                                   │
//! │    ▼                                                                    │
//! │   MembershipSync ──── RosterMissing ──► ABAdd ──► back to LoadLocal    │
//! │    │   NeedsFullResync: refetch without deltas (bounded)   (bounded)   │
//! │    ▼                                                                    │
//! │   AddressBookSync ─── same rules                                       │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │   ApplyDefaults      wait for session, push privacy, send bulk ADL     │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │   AwaitingBulkAck    count down acknowledged transactions              │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │   Synchronized       SynchronizationCompleted + ReverseAdded for each  │
//! │                      contact awaiting a decision, once per session     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A pass started while the session is already synchronized (and not
//! forced) is a refresh: the two delta fetches run and the pass completes
//! without another bulk ADL.

use tracing::{debug, error, info, warn};

use roster_core::{encode_bulk, OwnerSettings, RosterChange, RosterSnapshot, ServerFragment};

use crate::backend::{BackendRequest, BackendResponse, FaultKind, ServiceMethod};
use crate::connection::{ConnectionEvent, MembershipCommand, TransactionId};
use crate::error::{SyncError, SyncResult};
use crate::events::RosterEvent;
use crate::resolver::{self, fault_kind};
use crate::session::{SessionContext, SyncPhase};

/// How a pass ended when it returned successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Bulk ADL sent; completion follows the acknowledgments.
    AwaitingAcks,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Membership,
    AddressBook,
}

impl FetchKind {
    const fn method(self) -> ServiceMethod {
        match self {
            FetchKind::Membership => ServiceMethod::FindMembership,
            FetchKind::AddressBook => ServiceMethod::AbFindAll,
        }
    }
}

enum FetchOutcome {
    Merged,
    RosterMissing,
}

// =============================================================================
// Pass Entry
// =============================================================================

/// Runs a synchronization pass. Failures are reported as an
/// operation-failed notification and returned.
pub(crate) async fn run_pass(ctx: &SessionContext, forced: bool) -> SyncResult<PassOutcome> {
    let guard = ctx.begin_pass()?;

    let refresh = {
        let state = ctx.state.lock().await;
        !forced && state.phase == SyncPhase::Synchronized && state.snapshot.is_some()
    };
    info!(owner = %ctx.owner, forced, refresh, "Starting synchronization pass");

    let result = async {
        if forced {
            discard_for_resync(ctx).await?;
        }
        drive(ctx, refresh).await
    }
    .await;

    match result {
        Ok(PassOutcome::AwaitingAcks) => {
            guard.keep();
            Ok(PassOutcome::AwaitingAcks)
        }
        Ok(PassOutcome::Completed) => Ok(PassOutcome::Completed),
        Err(err) => {
            drop(guard);
            let operation = {
                let mut state = ctx.state.lock().await;
                state.last_error = Some(err.to_string());
                err.operation()
                    .map(str::to_string)
                    .unwrap_or_else(|| state.phase.to_string())
            };
            error!(owner = %ctx.owner, operation = %operation, error = %err, "Synchronization pass failed");
            ctx.emit(RosterEvent::failed(operation, &err));
            Err(err)
        }
    }
}

async fn drive(ctx: &SessionContext, refresh: bool) -> SyncResult<PassOutcome> {
    let mut creations = 0u32;

    loop {
        if ctx.state.lock().await.snapshot.is_none() {
            ctx.set_phase(SyncPhase::LoadLocal).await;
            load_local(ctx).await?;
        }

        ctx.set_phase(SyncPhase::MembershipSync).await;
        if let FetchOutcome::RosterMissing = fetch(ctx, FetchKind::Membership).await? {
            create_roster(ctx, &mut creations).await?;
            continue;
        }

        ctx.set_phase(SyncPhase::AddressBookSync).await;
        if let FetchOutcome::RosterMissing = fetch(ctx, FetchKind::AddressBook).await? {
            create_roster(ctx, &mut creations).await?;
            continue;
        }

        break;
    }

    fold_deltas(ctx).await?;

    if refresh {
        complete_pass(ctx).await;
        return Ok(PassOutcome::Completed);
    }

    apply_defaults(ctx).await
}

// =============================================================================
// LoadLocal
// =============================================================================

async fn load_local(ctx: &SessionContext) -> SyncResult<()> {
    let max_retries = ctx.config.sync.max_load_retries;
    let mut retries = 0u32;

    loop {
        match load_records(ctx).await {
            Ok(()) => return Ok(()),
            Err(err) if retries < max_retries => {
                retries += 1;
                warn!(owner = %ctx.owner, error = %err, attempt = retries, "Local records unusable, discarding");
                ctx.persistence.delete_snapshot(&ctx.owner).await?;
                ctx.persistence.delete_deltas(&ctx.owner).await?;
            }
            Err(err) => {
                error!(owner = %ctx.owner, error = %err, "Local records still unusable after discard");
                return Err(SyncError::RetriesExhausted {
                    operation: "LoadLocal".into(),
                    attempts: retries + 1,
                });
            }
        }
    }
}

async fn load_records(ctx: &SessionContext) -> SyncResult<()> {
    let mut snapshot = ctx
        .persistence
        .load_snapshot(&ctx.owner)
        .await?
        .unwrap_or_default();
    let deltas = ctx
        .persistence
        .load_deltas(&ctx.owner)
        .await?
        .unwrap_or_default();

    // replayed changes were already reported when first merged
    let replayed = snapshot.merge_all(&deltas.fragments);

    debug!(
        owner = %ctx.owner,
        contacts = snapshot.contacts.len(),
        fragments = deltas.fragments.len(),
        changes = replayed.len(),
        "Loaded local records"
    );

    let mut state = ctx.state.lock().await;
    state.snapshot = Some(snapshot);
    state.deltas = deltas;
    Ok(())
}

/// Drops the stored snapshot and delta fragments; the endpoint cache stays.
async fn discard_for_resync(ctx: &SessionContext) -> SyncResult<()> {
    info!(owner = %ctx.owner, "Discarding records for forced resynchronization");
    ctx.persistence.delete_snapshot(&ctx.owner).await?;
    ctx.persistence.truncate_deltas(&ctx.owner).await?;

    let mut state = ctx.state.lock().await;
    state.snapshot = None;
    state.deltas.truncate();
    state.notified_reverse.clear();
    state.outstanding_acks.clear();
    state.early_acks.clear();
    Ok(())
}

// =============================================================================
// MembershipSync / AddressBookSync
// =============================================================================

fn fetch_request(snapshot: &RosterSnapshot, kind: FetchKind, deltas_only: bool) -> BackendRequest {
    match kind {
        FetchKind::Membership => BackendRequest::FindMembership {
            deltas_only,
            since: snapshot.membership_last_change,
        },
        FetchKind::AddressBook => BackendRequest::FindAddressBook {
            deltas_only,
            since: snapshot.address_book_last_change,
            dynamic_since: snapshot.dynamic_item_last_change,
        },
    }
}

async fn fetch(ctx: &SessionContext, kind: FetchKind) -> SyncResult<FetchOutcome> {
    let method = kind.method();
    let max_resyncs = ctx.config.sync.max_resync_attempts;
    let mut resyncs = 0u32;

    let mut deltas_only = {
        let state = ctx.state.lock().await;
        let snapshot = state.snapshot()?;
        match kind {
            FetchKind::Membership => !snapshot.membership_last_change.is_never(),
            FetchKind::AddressBook => !snapshot.address_book_last_change.is_never(),
        }
    };

    loop {
        let request = fetch_request(ctx.state.lock().await.snapshot()?, kind, deltas_only);
        debug!(owner = %ctx.owner, method = %method, deltas_only, "Fetching");

        match resolver::invoke(ctx, &request).await {
            Ok(response) => {
                let fragment = match (kind, response) {
                    (FetchKind::Membership, BackendResponse::Membership(f)) => {
                        ServerFragment::Membership(f)
                    }
                    (FetchKind::AddressBook, BackendResponse::AddressBook(f)) => {
                        ServerFragment::AddressBook(f)
                    }
                    (_, other) => {
                        return Err(SyncError::InvalidOperation(format!(
                            "{} returned an unexpected response: {:?}",
                            method, other
                        )))
                    }
                };
                apply_fragment(ctx, fragment).await?;
                return Ok(FetchOutcome::Merged);
            }
            Err(err) => match fault_kind(&err) {
                Some(FaultKind::RosterMissing) => {
                    warn!(owner = %ctx.owner, method = %method, "Address book does not exist");
                    return Ok(FetchOutcome::RosterMissing);
                }
                Some(FaultKind::NeedsFullResync) if resyncs < max_resyncs => {
                    resyncs += 1;
                    warn!(owner = %ctx.owner, method = %method, attempt = resyncs, "Delta base rejected, refetching in full");
                    deltas_only = false;
                }
                Some(FaultKind::NeedsFullResync) => {
                    return Err(SyncError::RetriesExhausted {
                        operation: method.name().to_string(),
                        attempts: resyncs + 1,
                    })
                }
                _ => return Err(err),
            },
        }
    }
}

/// Merges a fetched fragment, logs it, persists both records and reports
/// the changes.
async fn apply_fragment(ctx: &SessionContext, fragment: ServerFragment) -> SyncResult<()> {
    let (events, snapshot, deltas) = {
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        let snapshot = state.snapshot.as_mut().ok_or(SyncError::NotLoaded)?;

        let changes = snapshot.merge(&fragment);
        state.deltas.append(fragment);

        let mut events = Vec::with_capacity(changes.len());
        for change in changes {
            match &change {
                // awaiting contacts are reported when the pass completes
                RosterChange::ReverseAdded { key }
                    if snapshot
                        .contacts
                        .get(key)
                        .is_some_and(|c| c.awaits_owner_decision()) =>
                {
                    continue
                }
                RosterChange::ReverseRemoved { key } => {
                    state.notified_reverse.remove(key);
                }
                _ => {}
            }
            events.push(RosterEvent::from(change));
        }

        (events, snapshot.clone(), state.deltas.clone())
    };

    ctx.persistence.save_snapshot(&ctx.owner, &snapshot).await?;
    ctx.persistence.save_deltas(&ctx.owner, &deltas).await?;

    for event in events {
        ctx.emit(event);
    }
    Ok(())
}

/// Saves the snapshot holding every merged fragment, then empties the log.
async fn fold_deltas(ctx: &SessionContext) -> SyncResult<()> {
    let (snapshot, deltas) = {
        let mut state = ctx.state.lock().await;
        let snapshot = state.snapshot()?.clone();
        state.deltas.truncate();
        (snapshot, state.deltas.clone())
    };

    ctx.persistence.save_snapshot(&ctx.owner, &snapshot).await?;
    ctx.persistence.save_deltas(&ctx.owner, &deltas).await?;
    debug!(owner = %ctx.owner, "Delta log folded into snapshot");
    Ok(())
}

async fn create_roster(ctx: &SessionContext, creations: &mut u32) -> SyncResult<()> {
    let limit = ctx.config.sync.max_roster_create_attempts;
    if *creations >= limit {
        error!(owner = %ctx.owner, attempts = *creations, "Address book still missing after creation");
        return Err(SyncError::RetriesExhausted {
            operation: ServiceMethod::AbAdd.name().to_string(),
            attempts: *creations,
        });
    }
    *creations += 1;

    info!(owner = %ctx.owner, "Creating address book");
    let request = BackendRequest::CreateAddressBook {
        owner: ctx.owner.clone(),
    };
    match resolver::invoke(ctx, &request).await {
        Ok(_) => {}
        Err(err) if fault_kind(&err) == Some(FaultKind::AlreadyExists) => {
            debug!(owner = %ctx.owner, "Address book already exists");
        }
        Err(err) => return Err(err),
    }

    // the roster has to be reloaded before any further membership activity
    ctx.state.lock().await.snapshot = None;
    Ok(())
}

// =============================================================================
// ApplyDefaults / AwaitingBulkAck
// =============================================================================

async fn apply_defaults(ctx: &SessionContext) -> SyncResult<PassOutcome> {
    ctx.set_phase(SyncPhase::ApplyDefaults).await;
    ctx.wait_for_session(ctx.config.session_timeout()).await?;

    let (settings, targets) = {
        let state = ctx.state.lock().await;
        let snapshot = state.snapshot()?;
        (
            OwnerSettings::from_properties(&snapshot.owner_properties),
            snapshot.bulk_targets(),
        )
    };

    debug!(owner = %ctx.owner, ?settings, "Applying owner settings");
    ctx.connection.apply_owner_settings(&settings).await?;

    let encoded = encode_bulk(&targets, true);
    for (target, err) in &encoded.skipped {
        warn!(
            owner = %ctx.owner,
            account = %target.account,
            client_type = %target.client_type,
            error = %err,
            "Leaving contact out of the initial membership list"
        );
    }
    let payloads = encoded.payloads;
    info!(
        owner = %ctx.owner,
        contacts = targets.len() - encoded.skipped.len(),
        skipped = encoded.skipped.len(),
        payloads = payloads.len(),
        "Sending initial membership list"
    );

    for payload in &payloads {
        let id = ctx
            .connection
            .send_command(MembershipCommand::Add, payload)
            .await?;
        debug!(transaction_id = %id, bytes = payload.len(), "Bulk ADL sent");

        let mut state = ctx.state.lock().await;
        if !state.early_acks.remove(&id) {
            state.outstanding_acks.insert(id);
        }
    }

    let done = {
        let mut state = ctx.state.lock().await;
        state.phase = SyncPhase::AwaitingBulkAck;
        state.outstanding_acks.is_empty()
    };
    info!(owner = %ctx.owner, to = %SyncPhase::AwaitingBulkAck, "Sync phase transition");

    if done {
        complete_pass(ctx).await;
        Ok(PassOutcome::Completed)
    } else {
        Ok(PassOutcome::AwaitingAcks)
    }
}

/// Counts down a bulk acknowledgment; completes the pass on the last one.
pub(crate) async fn acknowledge(ctx: &SessionContext, id: TransactionId) {
    let complete = {
        let mut state = ctx.state.lock().await;
        if state.outstanding_acks.remove(&id) {
            debug!(transaction_id = %id, remaining = state.outstanding_acks.len(), "Bulk ADL acknowledged");
            state.outstanding_acks.is_empty() && state.phase == SyncPhase::AwaitingBulkAck
        } else {
            if state.phase == SyncPhase::ApplyDefaults {
                state.early_acks.insert(id);
            }
            false
        }
    };

    if complete {
        complete_pass(ctx).await;
    }
}

async fn complete_pass(ctx: &SessionContext) {
    let to_notify: Vec<String> = {
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        state.phase = SyncPhase::Synchronized;
        state.early_acks.clear();
        state.last_error = None;

        let awaiting = state
            .snapshot
            .as_ref()
            .map(|s| s.awaiting_decision())
            .unwrap_or_default();
        awaiting
            .into_iter()
            .filter(|key| state.notified_reverse.insert(key.clone()))
            .collect()
    };
    ctx.end_pass();

    info!(owner = %ctx.owner, reverse = to_notify.len(), "Synchronization completed");
    ctx.emit(RosterEvent::SynchronizationCompleted);
    for key in to_notify {
        ctx.emit(RosterEvent::ReverseAdded { key });
    }
}

/// Routes a live-connection signal into the session.
pub(crate) async fn handle_event(ctx: &SessionContext, event: ConnectionEvent) {
    match event {
        ConnectionEvent::SessionEstablished => {
            info!(owner = %ctx.owner, "Live session established");
            ctx.set_session_established(true);
        }
        ConnectionEvent::SessionClosed => {
            info!(owner = %ctx.owner, "Live session closed");
            ctx.set_session_established(false);

            let abandoned = {
                let mut state = ctx.state.lock().await;
                let abandoned = state.phase == SyncPhase::AwaitingBulkAck;
                if abandoned {
                    state.phase = SyncPhase::Idle;
                    state.outstanding_acks.clear();
                    state.early_acks.clear();
                }
                abandoned
            };
            if abandoned {
                warn!(owner = %ctx.owner, "Bulk acknowledgments abandoned with the session");
                ctx.end_pass();
            }
        }
        ConnectionEvent::CommandAcknowledged(id) => acknowledge(ctx, id).await,
    }
}
