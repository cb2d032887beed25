//! Contact group creation and removal against the address book service.

use tracing::info;
use uuid::Uuid;

use roster_core::validation::validate_group_name;

use crate::backend::{BackendRequest, BackendResponse};
use crate::error::{SyncError, SyncResult};
use crate::events::RosterEvent;
use crate::resolver;
use crate::session::SessionContext;

/// Creates a group and records it in the snapshot.
pub(crate) async fn add_group(ctx: &SessionContext, name: &str) -> SyncResult<Uuid> {
    ctx.ensure_open()?;
    let name = name.trim();
    validate_group_name(name)?;

    {
        let state = ctx.state.lock().await;
        let exists = state
            .snapshot()?
            .groups
            .values()
            .any(|existing| existing.eq_ignore_ascii_case(name));
        if exists {
            return Err(SyncError::InvalidOperation(format!("Group '{}' already exists", name)));
        }
    }

    let request = BackendRequest::AddGroup {
        name: name.to_string(),
    };
    let id = match resolver::invoke(ctx, &request).await {
        Ok(BackendResponse::GroupAdded { id }) => id,
        Ok(other) => {
            return Err(fail(
                ctx,
                "ABGroupAdd",
                SyncError::InvalidOperation(format!("Unexpected group-add response: {:?}", other)),
            ))
        }
        Err(err) => return Err(fail(ctx, "ABGroupAdd", err)),
    };

    let snapshot = {
        let mut state = ctx.state.lock().await;
        let snapshot = state.snapshot_mut()?;
        snapshot.groups.insert(id, name.to_string());
        snapshot.clone()
    };
    ctx.persistence.save_snapshot(&ctx.owner, &snapshot).await?;

    info!(group_id = %id, name, "Group added");
    ctx.emit(RosterEvent::GroupAdded {
        id,
        name: name.to_string(),
    });
    Ok(id)
}

/// Deletes an empty group.
pub(crate) async fn remove_group(ctx: &SessionContext, id: Uuid) -> SyncResult<()> {
    ctx.ensure_open()?;

    {
        let state = ctx.state.lock().await;
        let snapshot = state.snapshot()?;
        if !snapshot.groups.contains_key(&id) {
            return Err(SyncError::InvalidOperation(format!("Unknown group {}", id)));
        }
        let members = snapshot.group_size(id);
        if members > 0 {
            return Err(SyncError::InvalidOperation(format!(
                "Group {} still has {} contacts",
                id, members
            )));
        }
    }

    if let Err(err) = resolver::invoke(ctx, &BackendRequest::DeleteGroup { id }).await {
        return Err(fail(ctx, "ABGroupDelete", err));
    }

    let (name, snapshot) = {
        let mut state = ctx.state.lock().await;
        let snapshot = state.snapshot_mut()?;
        let name = snapshot.groups.remove(&id).unwrap_or_default();
        (name, snapshot.clone())
    };
    ctx.persistence.save_snapshot(&ctx.owner, &snapshot).await?;

    info!(group_id = %id, name = %name, "Group removed");
    ctx.emit(RosterEvent::GroupRemoved { id, name });
    Ok(())
}

fn fail(ctx: &SessionContext, fallback: &str, err: SyncError) -> SyncError {
    let operation = err.operation().unwrap_or(fallback).to_string();
    ctx.emit(RosterEvent::failed(operation, &err));
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ServiceFault, ServiceMethod};
    use crate::testing::{load_roster, Harness, OWNER};

    #[tokio::test]
    async fn test_add_group_records_and_persists() {
        let harness = Harness::resolved();
        let id = Uuid::new_v4();
        harness
            .backend
            .respond(ServiceMethod::AbGroupAdd, BackendResponse::GroupAdded { id });
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;

        assert_eq!(add_group(&ctx, "  Work ").await.unwrap(), id);

        assert_eq!(
            harness.backend.requests(),
            vec![BackendRequest::AddGroup { name: "Work".into() }]
        );
        let stored = harness.persistence.stored_snapshot(OWNER).await.unwrap();
        assert_eq!(stored.groups.get(&id).map(String::as_str), Some("Work"));
        assert_eq!(
            harness.emitter.events(),
            vec![RosterEvent::GroupAdded { id, name: "Work".into() }]
        );
    }

    #[tokio::test]
    async fn test_duplicate_or_invalid_group_name_is_refused() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;
        ctx.state
            .lock()
            .await
            .snapshot_mut()
            .unwrap()
            .groups
            .insert(Uuid::new_v4(), "Friends".into());

        assert!(matches!(
            add_group(&ctx, "friends").await,
            Err(SyncError::InvalidOperation(_))
        ));
        assert!(matches!(add_group(&ctx, "").await, Err(SyncError::Core(_))));
        assert!(harness.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_group_refuses_non_empty_group() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![], &["a@example.com"]).await;
        let id = Uuid::new_v4();
        {
            let mut state = ctx.state.lock().await;
            let snapshot = state.snapshot_mut().unwrap();
            snapshot.groups.insert(id, "Work".into());
            for contact in snapshot.contacts.values_mut() {
                contact.groups.insert(id);
            }
        }

        assert!(matches!(remove_group(&ctx, id).await, Err(SyncError::InvalidOperation(_))));
        assert!(matches!(
            remove_group(&ctx, Uuid::new_v4()).await,
            Err(SyncError::InvalidOperation(_))
        ));
        assert!(harness.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_group() {
        let harness = Harness::resolved();
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;
        let id = Uuid::new_v4();
        ctx.state
            .lock()
            .await
            .snapshot_mut()
            .unwrap()
            .groups
            .insert(id, "Old".into());

        remove_group(&ctx, id).await.unwrap();

        assert_eq!(harness.backend.requests(), vec![BackendRequest::DeleteGroup { id }]);
        assert!(harness.persistence.stored_snapshot(OWNER).await.unwrap().groups.is_empty());
        assert_eq!(
            harness.emitter.events(),
            vec![RosterEvent::GroupRemoved { id, name: "Old".into() }]
        );
    }

    #[tokio::test]
    async fn test_group_fault_is_reported() {
        let harness = Harness::resolved();
        harness
            .backend
            .fail(ServiceMethod::AbGroupAdd, ServiceFault::new("soap:Server", "nope"));
        let ctx = harness.context();
        load_roster(&ctx, vec![], &[]).await;

        assert!(add_group(&ctx, "Work").await.is_err());
        assert_eq!(harness.emitter.failures()[0].0, "ABGroupAdd");
    }
}
