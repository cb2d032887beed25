//! # Record Persistence Seam
//!
//! The two versioned records kept per signed-in identity, behind one trait
//! so the engine runs against the SQLite cache or purely in memory.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      RosterPersistence                                  │
//! │                                                                         │
//! │  roster snapshot           delta log                                   │
//! │  ├── load_snapshot         ├── load_deltas                             │
//! │  ├── save_snapshot         ├── save_deltas                             │
//! │  └── delete_snapshot       ├── truncate_deltas  (endpoint cache kept)  │
//! │                            └── delete_deltas    (everything dropped)   │
//! │                                                                         │
//! │  impl for roster_db::Database   │   impl for MemoryPersistence         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A stored record whose schema version differs from the running engine's
//! loads as [`SyncError::VersionMismatch`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use roster_core::{DeltaLog, RosterSnapshot, DELTA_LOG_SCHEMA_VERSION, SNAPSHOT_SCHEMA_VERSION};
use roster_db::Database;

use crate::error::{SyncError, SyncResult};

#[async_trait]
pub trait RosterPersistence: Send + Sync {
    async fn load_snapshot(&self, owner: &str) -> SyncResult<Option<RosterSnapshot>>;
    async fn save_snapshot(&self, owner: &str, snapshot: &RosterSnapshot) -> SyncResult<()>;
    async fn delete_snapshot(&self, owner: &str) -> SyncResult<()>;

    async fn load_deltas(&self, owner: &str) -> SyncResult<Option<DeltaLog>>;
    async fn save_deltas(&self, owner: &str, log: &DeltaLog) -> SyncResult<()>;
    /// Drops stored fragments, keeping the endpoint cache.
    async fn truncate_deltas(&self, owner: &str) -> SyncResult<()>;
    async fn delete_deltas(&self, owner: &str) -> SyncResult<()>;
}

// =============================================================================
// SQLite
// =============================================================================

#[async_trait]
impl RosterPersistence for Database {
    async fn load_snapshot(&self, owner: &str) -> SyncResult<Option<RosterSnapshot>> {
        Ok(self.snapshots().load(owner).await?)
    }

    async fn save_snapshot(&self, owner: &str, snapshot: &RosterSnapshot) -> SyncResult<()> {
        Ok(self.snapshots().save(owner, snapshot).await?)
    }

    async fn delete_snapshot(&self, owner: &str) -> SyncResult<()> {
        self.snapshots().delete(owner).await?;
        Ok(())
    }

    async fn load_deltas(&self, owner: &str) -> SyncResult<Option<DeltaLog>> {
        Ok(self.delta_logs().load(owner).await?)
    }

    async fn save_deltas(&self, owner: &str, log: &DeltaLog) -> SyncResult<()> {
        Ok(self.delta_logs().save(owner, log).await?)
    }

    async fn truncate_deltas(&self, owner: &str) -> SyncResult<()> {
        self.delta_logs().truncate(owner).await?;
        Ok(())
    }

    async fn delete_deltas(&self, owner: &str) -> SyncResult<()> {
        self.delta_logs().delete(owner).await?;
        Ok(())
    }
}

// =============================================================================
// In-Memory
// =============================================================================

#[derive(Default)]
struct Records {
    snapshot: Option<RosterSnapshot>,
    deltas: Option<DeltaLog>,
}

/// Process-local records, checked against the schema versions the same way
/// the SQLite cache is.
#[derive(Default)]
pub struct MemoryPersistence {
    records: Mutex<HashMap<String, Records>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with a stored delta log for `owner` and no snapshot.
    pub fn with_deltas(owner: &str, deltas: DeltaLog) -> Self {
        let records = Records {
            snapshot: None,
            deltas: Some(deltas),
        };
        MemoryPersistence {
            records: Mutex::new(HashMap::from([(owner.to_string(), records)])),
        }
    }

    /// Seeds the records for `owner` without any version check.
    pub async fn seed(&self, owner: &str, snapshot: Option<RosterSnapshot>, deltas: Option<DeltaLog>) {
        self.records
            .lock()
            .await
            .insert(owner.to_string(), Records { snapshot, deltas });
    }

    /// The stored snapshot, as saved.
    pub async fn stored_snapshot(&self, owner: &str) -> Option<RosterSnapshot> {
        self.records
            .lock()
            .await
            .get(owner)
            .and_then(|r| r.snapshot.clone())
    }

    /// The stored delta log, as saved.
    pub async fn stored_deltas(&self, owner: &str) -> Option<DeltaLog> {
        self.records
            .lock()
            .await
            .get(owner)
            .and_then(|r| r.deltas.clone())
    }
}

fn check_version(record: &str, expected: u32, found: u32) -> SyncResult<()> {
    if found == expected {
        Ok(())
    } else {
        Err(SyncError::VersionMismatch(format!(
            "{} schema version {} does not match expected {}",
            record, found, expected
        )))
    }
}

#[async_trait]
impl RosterPersistence for MemoryPersistence {
    async fn load_snapshot(&self, owner: &str) -> SyncResult<Option<RosterSnapshot>> {
        let Some(snapshot) = self.stored_snapshot(owner).await else {
            return Ok(None);
        };
        check_version("roster snapshot", SNAPSHOT_SCHEMA_VERSION, snapshot.schema_version)?;
        Ok(Some(snapshot))
    }

    async fn save_snapshot(&self, owner: &str, snapshot: &RosterSnapshot) -> SyncResult<()> {
        self.records
            .lock()
            .await
            .entry(owner.to_string())
            .or_default()
            .snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn delete_snapshot(&self, owner: &str) -> SyncResult<()> {
        if let Some(records) = self.records.lock().await.get_mut(owner) {
            records.snapshot = None;
        }
        Ok(())
    }

    async fn load_deltas(&self, owner: &str) -> SyncResult<Option<DeltaLog>> {
        let Some(log) = self.stored_deltas(owner).await else {
            return Ok(None);
        };
        check_version("delta log", DELTA_LOG_SCHEMA_VERSION, log.schema_version)?;
        Ok(Some(log))
    }

    async fn save_deltas(&self, owner: &str, log: &DeltaLog) -> SyncResult<()> {
        self.records
            .lock()
            .await
            .entry(owner.to_string())
            .or_default()
            .deltas = Some(log.clone());
        Ok(())
    }

    async fn truncate_deltas(&self, owner: &str) -> SyncResult<()> {
        if let Some(log) = self
            .records
            .lock()
            .await
            .get_mut(owner)
            .and_then(|r| r.deltas.as_mut())
        {
            log.truncate();
        }
        Ok(())
    }

    async fn delete_deltas(&self, owner: &str) -> SyncResult<()> {
        if let Some(records) = self.records.lock().await.get_mut(owner) {
            records.deltas = None;
        }
        Ok(())
    }
}
