//! # Membership Mutator
//!
//! Single-contact list changes after (or outside) a synchronization pass.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         List Mutation Routing                           │
//! │                                                                         │
//! │  Forward ─────────────────────────────► ADL/RML only (no backend call) │
//! │  Allowed / Blocked ──► AddMember / DeleteMember ──► then ADL/RML       │
//! │  Pending removal ────► DeleteMember                                    │
//! │  Pending add, Reverse add/remove ─────► refused                        │
//! │                                                                         │
//! │  Allowed <-> Blocked switch (block / unblock):                         │
//! │    remove from the old list ──► delay ──► add to the new list          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! "Member already exists" on add and "member does not exist" on remove
//! count as success: the local roster is brought in line either way.

use tracing::{debug, info, warn};

use roster_core::validation::validate_account;
use roster_core::{
    contact_key, encode_memberships, ClientType, MembershipList, MembershipSet, MembershipTarget,
};

use crate::backend::{BackendRequest, BackendResponse, FaultKind};
use crate::connection::MembershipCommand;
use crate::error::{SyncError, SyncResult};
use crate::events::RosterEvent;
use crate::resolver::{self, fault_kind};
use crate::session::SessionContext;

/// Result of a list mutation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// The contact was already in the requested state.
    Unchanged,
    /// The mutation is never attempted for this list.
    Disallowed,
}

// =============================================================================
// Add / Remove
// =============================================================================

/// Puts a contact on `list`, switching it off the exclusive list first.
pub(crate) async fn add_to_list(
    ctx: &SessionContext,
    account: &str,
    client_type: ClientType,
    list: MembershipList,
) -> SyncResult<MutationOutcome> {
    if let Some(other) = list.exclusive_with() {
        if is_on(ctx, account, client_type, other).await? {
            return switch_list(ctx, account, client_type, other, list).await;
        }
    }
    add_single(ctx, account, client_type, list).await
}

/// Takes a contact off `list`.
pub(crate) async fn remove_from_list(
    ctx: &SessionContext,
    account: &str,
    client_type: ClientType,
    list: MembershipList,
) -> SyncResult<MutationOutcome> {
    ctx.ensure_open()?;
    validate_account(account, client_type)?;

    if list == MembershipList::Reverse {
        debug!(account, "Reverse list is server-owned, not removing");
        return Ok(MutationOutcome::Disallowed);
    }
    if !is_on(ctx, account, client_type, list).await? {
        return Ok(MutationOutcome::Unchanged);
    }

    let result = async {
        if let Some(role) = list.role() {
            let membership_id = {
                let state = ctx.state.lock().await;
                state
                    .snapshot()?
                    .contact(account, client_type)
                    .and_then(|c| c.membership_ids.get(&role).cloned())
            };
            let request = BackendRequest::DeleteMember {
                account: account.to_string(),
                client_type,
                role,
                membership_id,
            };
            match resolver::invoke(ctx, &request).await {
                Ok(_) => {}
                Err(err) if fault_kind(&err) == Some(FaultKind::DoesNotExist) => {
                    info!(account, %list, "Membership already gone on the service");
                }
                Err(err) => return Err(err),
            }
        }

        if matches!(
            list,
            MembershipList::Forward | MembershipList::Allowed | MembershipList::Blocked
        ) {
            send_single(ctx, MembershipCommand::Remove, account, client_type, list).await?;
        }

        let key = contact_key(account, client_type);
        let snapshot = {
            let mut state = ctx.state.lock().await;
            let snapshot = state.snapshot_mut()?;
            if let Some(contact) = snapshot.contacts.get_mut(&key) {
                contact.lists.remove(list);
                if let Some(role) = list.role() {
                    contact.membership_ids.remove(&role);
                }
                if contact.is_orphaned() {
                    snapshot.contacts.remove(&key);
                }
            }
            snapshot.clone()
        };
        ctx.persistence.save_snapshot(&ctx.owner, &snapshot).await?;
        Ok::<_, SyncError>(key)
    }
    .await;

    match result {
        Ok(key) => {
            info!(account, %list, "Removed from list");
            ctx.emit(RosterEvent::ContactRemoved { key, list });
            Ok(MutationOutcome::Applied)
        }
        Err(err) => {
            let fallback = match list.role() {
                Some(_) => "DeleteMember",
                None => MembershipCommand::Remove.wire_name(),
            };
            Err(report(ctx, fallback, err))
        }
    }
}

async fn add_single(
    ctx: &SessionContext,
    account: &str,
    client_type: ClientType,
    list: MembershipList,
) -> SyncResult<MutationOutcome> {
    ctx.ensure_open()?;
    validate_account(account, client_type)?;

    if matches!(list, MembershipList::Pending | MembershipList::Reverse) {
        debug!(account, %list, "List is server-owned, not adding");
        return Ok(MutationOutcome::Disallowed);
    }
    if is_on(ctx, account, client_type, list).await? {
        return Ok(MutationOutcome::Unchanged);
    }

    let result = async {
        let mut membership_id = None;
        if let Some(role) = list.role() {
            let request = BackendRequest::AddMember {
                account: account.to_string(),
                client_type,
                role,
            };
            match resolver::invoke(ctx, &request).await {
                Ok(BackendResponse::MemberAdded { membership_id: id }) => membership_id = id,
                Ok(_) => {}
                Err(err) if fault_kind(&err) == Some(FaultKind::AlreadyExists) => {
                    info!(account, %list, "Membership already present on the service");
                }
                Err(err) => return Err(err),
            }
        }

        send_single(ctx, MembershipCommand::Add, account, client_type, list).await?;

        let (key, snapshot) = {
            let mut state = ctx.state.lock().await;
            let snapshot = state.snapshot_mut()?;
            let contact = snapshot.contact_entry(account, client_type);
            contact.lists.insert(list);
            if let (Some(role), Some(id)) = (list.role(), membership_id) {
                contact.membership_ids.insert(role, id);
            }
            (contact.hash(), snapshot.clone())
        };
        ctx.persistence.save_snapshot(&ctx.owner, &snapshot).await?;
        Ok::<_, SyncError>(key)
    }
    .await;

    match result {
        Ok(key) => {
            info!(account, %list, "Added to list");
            ctx.emit(RosterEvent::ContactAdded { key, list });
            Ok(MutationOutcome::Applied)
        }
        Err(err) => {
            let fallback = match list.role() {
                Some(_) => "AddMember",
                None => MembershipCommand::Add.wire_name(),
            };
            Err(report(ctx, fallback, err))
        }
    }
}

// =============================================================================
// Compound Switch
// =============================================================================

/// Moves a contact between two exclusive lists. The add is only issued
/// after the removal has completed.
async fn switch_list(
    ctx: &SessionContext,
    account: &str,
    client_type: ClientType,
    from: MembershipList,
    to: MembershipList,
) -> SyncResult<MutationOutcome> {
    debug!(account, %from, %to, "Switching exclusive list");

    if remove_from_list(ctx, account, client_type, from).await? == MutationOutcome::Applied {
        let delay = ctx.config.compound_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    add_single(ctx, account, client_type, to).await
}

/// Moves a contact onto the Blocked list.
pub(crate) async fn block(
    ctx: &SessionContext,
    account: &str,
    client_type: ClientType,
) -> SyncResult<MutationOutcome> {
    add_to_list(ctx, account, client_type, MembershipList::Blocked).await
}

/// Moves a Blocked contact back onto the Allowed list.
pub(crate) async fn unblock(
    ctx: &SessionContext,
    account: &str,
    client_type: ClientType,
) -> SyncResult<MutationOutcome> {
    if !is_on(ctx, account, client_type, MembershipList::Blocked).await? {
        return Ok(MutationOutcome::Unchanged);
    }
    add_to_list(ctx, account, client_type, MembershipList::Allowed).await
}

// =============================================================================
// Helpers
// =============================================================================

async fn is_on(
    ctx: &SessionContext,
    account: &str,
    client_type: ClientType,
    list: MembershipList,
) -> SyncResult<bool> {
    let state = ctx.state.lock().await;
    Ok(state
        .snapshot()?
        .contact(account, client_type)
        .is_some_and(|c| c.is_on(list)))
}

/// Sends one non-initial membership command for a single list.
async fn send_single(
    ctx: &SessionContext,
    command: MembershipCommand,
    account: &str,
    client_type: ClientType,
    list: MembershipList,
) -> SyncResult<()> {
    let lists: MembershipSet = [list].into_iter().collect();
    let target = MembershipTarget::new(account, client_type, lists);
    for payload in encode_memberships(&[target], false)? {
        let id = ctx.connection.send_command(command, &payload).await?;
        debug!(%command, transaction_id = %id, "Membership command sent");
    }
    Ok(())
}

fn report(ctx: &SessionContext, fallback: &str, err: SyncError) -> SyncError {
    let operation = err.operation().unwrap_or(fallback).to_string();
    warn!(owner = %ctx.owner, operation = %operation, error = %err, "List mutation failed");
    ctx.emit(RosterEvent::failed(operation, &err));
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ServiceFault, ServiceMethod};
    use crate::testing::{load_roster, member, Harness, OWNER};
    use roster_core::MemberRole;
    use std::time::Duration;

    const FRIEND: &str = "a@example.com";

    fn lists_of(ctx_state: &crate::session::RosterState) -> MembershipSet {
        ctx_state
            .snapshot()
            .unwrap()
            .contact(FRIEND, ClientType::Passport)
            .map(|c| c.lists)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_allowed_add_issues_one_rpc_and_one_command() {
        let harness = Harness::resolved();
        harness.backend.respond(
            ServiceMethod::AddMember,
            BackendResponse::MemberAdded { membership_id: Some("m-1".into()) },
        );
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;

        let outcome = add_to_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Allowed)
            .await
            .unwrap();

        assert_eq!(outcome, MutationOutcome::Applied);
        assert_eq!(
            harness.backend.requests(),
            vec![BackendRequest::AddMember {
                account: FRIEND.into(),
                client_type: ClientType::Passport,
                role: MemberRole::Allow,
            }]
        );
        assert_eq!(
            harness.connection.sent(),
            vec![(
                MembershipCommand::Add,
                r#"<ml><d n="example.com"><c n="a" l="2" t="1" /></d></ml>"#.to_string()
            )]
        );

        let state = ctx.state.lock().await;
        assert!(lists_of(&state).contains(MembershipList::Allowed));
        let contact = state.snapshot().unwrap().contact(FRIEND, ClientType::Passport).unwrap();
        assert_eq!(contact.membership_ids.get(&MemberRole::Allow).map(String::as_str), Some("m-1"));
    }

    #[tokio::test]
    async fn test_forward_round_trip_needs_no_rpc() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;

        add_to_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Forward)
            .await
            .unwrap();
        assert!(lists_of(&*ctx.state.lock().await).contains(MembershipList::Forward));

        let first = remove_from_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Forward)
            .await
            .unwrap();
        let second = remove_from_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Forward)
            .await
            .unwrap();

        assert_eq!(first, MutationOutcome::Applied);
        assert_eq!(second, MutationOutcome::Unchanged);
        assert!(harness.backend.calls().is_empty());
        let commands: Vec<_> = harness.connection.sent().into_iter().map(|(c, _)| c).collect();
        assert_eq!(commands, vec![MembershipCommand::Add, MembershipCommand::Remove]);
        assert!(ctx
            .state
            .lock()
            .await
            .snapshot()
            .unwrap()
            .contact(FRIEND, ClientType::Passport)
            .is_none());
    }

    #[tokio::test]
    async fn test_completed_mutations_are_persisted() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;

        add_to_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Forward)
            .await
            .unwrap();
        let stored = harness.persistence.stored_snapshot(OWNER).await.unwrap();
        assert!(stored
            .contact(FRIEND, ClientType::Passport)
            .is_some_and(|c| c.is_on(MembershipList::Forward)));

        remove_from_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Forward)
            .await
            .unwrap();
        let stored = harness.persistence.stored_snapshot(OWNER).await.unwrap();
        assert!(stored.contact(FRIEND, ClientType::Passport).is_none());
    }

    #[tokio::test]
    async fn test_already_exists_counts_as_success() {
        let harness = Harness::resolved();
        harness.backend.fail(
            ServiceMethod::AddMember,
            ServiceFault::new("soap:Client", "Member already exists"),
        );
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;

        let outcome = add_to_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Blocked)
            .await
            .unwrap();

        assert_eq!(outcome, MutationOutcome::Applied);
        assert!(lists_of(&*ctx.state.lock().await).contains(MembershipList::Blocked));
        assert!(harness.emitter.failures().is_empty());
        assert_eq!(harness.connection.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_does_not_exist_counts_as_success() {
        let harness = Harness::resolved();
        harness.backend.fail(
            ServiceMethod::DeleteMember,
            ServiceFault::new("soap:Client", "Member does not exist"),
        );
        let ctx = harness.context();
        load_roster(&ctx, vec![member(FRIEND, MemberRole::Allow)], &[FRIEND]).await;

        let outcome = remove_from_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Allowed)
            .await
            .unwrap();

        assert_eq!(outcome, MutationOutcome::Applied);
        let state = ctx.state.lock().await;
        assert_eq!(lists_of(&state), [MembershipList::Forward].into_iter().collect::<MembershipSet>());
        assert!(harness.emitter.failures().is_empty());
    }

    #[tokio::test]
    async fn test_remove_sends_stored_membership_id() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![member(FRIEND, MemberRole::Allow)], &[]).await;

        remove_from_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Allowed)
            .await
            .unwrap();

        assert_eq!(
            harness.backend.requests(),
            vec![BackendRequest::DeleteMember {
                account: FRIEND.into(),
                client_type: ClientType::Passport,
                role: MemberRole::Allow,
                membership_id: Some(format!("Allow-{}", FRIEND)),
            }]
        );
        // no lists and no address book entry left
        assert!(ctx
            .state
            .lock()
            .await
            .snapshot()
            .unwrap()
            .contact(FRIEND, ClientType::Passport)
            .is_none());
    }

    #[tokio::test]
    async fn test_pending_removal_issues_rpc_without_command() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![member(FRIEND, MemberRole::Pending)], &[]).await;

        remove_from_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Pending)
            .await
            .unwrap();

        assert_eq!(harness.backend.requests_for(ServiceMethod::DeleteMember).len(), 1);
        assert!(harness.connection.sent().is_empty());
    }

    #[tokio::test]
    async fn test_server_owned_lists_are_refused() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![member(FRIEND, MemberRole::Reverse)], &[]).await;

        let pending = add_to_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Pending).await;
        let reverse = remove_from_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Reverse).await;

        assert_eq!(pending.unwrap(), MutationOutcome::Disallowed);
        assert_eq!(reverse.unwrap(), MutationOutcome::Disallowed);
        assert!(harness.backend.calls().is_empty());
        assert!(lists_of(&*ctx.state.lock().await).contains(MembershipList::Reverse));
    }

    #[tokio::test]
    async fn test_unhandled_fault_reports_and_leaves_roster() {
        let harness = Harness::resolved();
        harness.backend.fail(
            ServiceMethod::AddMember,
            ServiceFault::new("soap:Server", "backend unavailable").with_detail("<detail>down</detail>"),
        );
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;

        let err = add_to_list(&ctx, FRIEND, ClientType::Passport, MembershipList::Allowed)
            .await
            .unwrap_err();

        assert_eq!(err.operation(), Some("AddMember"));
        assert_eq!(
            harness.emitter.failures(),
            vec![("AddMember".to_string(), "<detail>down</detail>".to_string())]
        );
        assert!(harness.connection.sent().is_empty());
        assert!(lists_of(&*ctx.state.lock().await).is_empty());
    }

    #[tokio::test]
    async fn test_mutation_before_load_is_not_loaded() {
        let harness = Harness::resolved();
        let err = add_to_list(&harness.context(), FRIEND, ClientType::Passport, MembershipList::Forward)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotLoaded));
    }

    #[tokio::test]
    async fn test_invalid_account_is_rejected() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;

        let err = add_to_list(&ctx, "not-an-address", ClientType::Passport, MembershipList::Allowed)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Core(_)));
        assert!(harness.backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_removes_allowed_before_adding_blocked() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![member(FRIEND, MemberRole::Allow)], &[FRIEND]).await;

        let started = tokio::time::Instant::now();
        let outcome = block(&ctx, FRIEND, ClientType::Passport).await.unwrap();

        assert_eq!(outcome, MutationOutcome::Applied);
        let requests = harness.backend.requests();
        assert!(matches!(
            requests[..],
            [
                BackendRequest::DeleteMember { role: MemberRole::Allow, .. },
                BackendRequest::AddMember { role: MemberRole::Block, .. },
            ]
        ));
        assert!(started.elapsed() >= Duration::from_millis(100));

        let commands = harness.connection.sent();
        assert_eq!(commands[0].0, MembershipCommand::Remove);
        assert_eq!(commands[1].0, MembershipCommand::Add);
        assert!(commands[1].1.contains("l=\"4\""));

        let lists = lists_of(&*ctx.state.lock().await);
        assert!(lists.contains(MembershipList::Blocked));
        assert!(!lists.contains(MembershipList::Allowed));
        assert!(lists.contains(MembershipList::Forward));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_stops_when_removal_fails() {
        let harness = Harness::resolved();
        harness
            .backend
            .fail(ServiceMethod::DeleteMember, ServiceFault::new("soap:Server", "boom"));
        let ctx = harness.context();
        load_roster(&ctx, vec![member(FRIEND, MemberRole::Allow)], &[]).await;

        assert!(block(&ctx, FRIEND, ClientType::Passport).await.is_err());

        assert!(harness.backend.requests_for(ServiceMethod::AddMember).is_empty());
        assert!(lists_of(&*ctx.state.lock().await).contains(MembershipList::Allowed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unblock_moves_back_to_allowed() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![member(FRIEND, MemberRole::Block)], &[]).await;

        assert_eq!(
            unblock(&ctx, FRIEND, ClientType::Passport).await.unwrap(),
            MutationOutcome::Applied
        );
        assert_eq!(
            unblock(&ctx, FRIEND, ClientType::Passport).await.unwrap(),
            MutationOutcome::Unchanged
        );

        let lists = lists_of(&*ctx.state.lock().await);
        assert!(lists.contains(MembershipList::Allowed));
        assert!(!lists.contains(MembershipList::Blocked));
    }
}
