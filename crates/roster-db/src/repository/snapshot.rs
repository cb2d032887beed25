//! # Roster Snapshot Repository
//!
//! One row per signed-in identity holding the merged roster as JSON.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  roster_snapshots                                                       │
//! │                                                                         │
//! │  owner            | schema_version | payload          | saved_at       │
//! │  ─────────────────┼────────────────┼──────────────────┼────────────────│
//! │  alice@example.com│ 3              │ {"contacts":...} │ 2026-10-14T... │
//! │                                                                         │
//! │  load(): schema_version ≠ SNAPSHOT_SCHEMA_VERSION → SchemaMismatch     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use roster_core::{RosterSnapshot, SNAPSHOT_SCHEMA_VERSION};

use crate::error::{DbError, DbResult};

const RECORD: &str = "roster snapshot";

/// Repository for roster snapshot records.
#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SnapshotRepository { pool }
    }

    /// Loads the snapshot for `owner`.
    ///
    /// ## Returns
    /// * `Ok(None)` - nothing stored yet
    /// * `Err(DbError::SchemaMismatch)` - stored by an incompatible engine
    /// * `Err(DbError::CorruptRecord)` - payload did not decode
    pub async fn load(&self, owner: &str) -> DbResult<Option<RosterSnapshot>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT schema_version, payload
            FROM roster_snapshots
            WHERE owner = ?1
            "#,
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        let Some((version, payload)) = row else {
            debug!(owner = %owner, "No stored roster snapshot");
            return Ok(None);
        };

        let found = u32::try_from(version).unwrap_or(0);
        if found != SNAPSHOT_SCHEMA_VERSION {
            return Err(DbError::SchemaMismatch {
                record: RECORD,
                expected: SNAPSHOT_SCHEMA_VERSION,
                found,
            });
        }

        let snapshot: RosterSnapshot =
            serde_json::from_str(&payload).map_err(|e| DbError::corrupt(RECORD, e))?;

        debug!(
            owner = %owner,
            contacts = snapshot.contacts.len(),
            groups = snapshot.groups.len(),
            "Loaded roster snapshot"
        );

        Ok(Some(snapshot))
    }

    /// Stores the snapshot for `owner`, replacing any previous one.
    pub async fn save(&self, owner: &str, snapshot: &RosterSnapshot) -> DbResult<()> {
        let payload = serde_json::to_string(snapshot).map_err(|e| DbError::corrupt(RECORD, e))?;

        sqlx::query(
            r#"
            INSERT INTO roster_snapshots (owner, schema_version, payload, saved_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(owner) DO UPDATE SET
                schema_version = excluded.schema_version,
                payload = excluded.payload,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(owner)
        .bind(i64::from(snapshot.schema_version))
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(owner = %owner, bytes = payload.len(), "Saved roster snapshot");
        Ok(())
    }

    /// Deletes the snapshot for `owner`. Returns whether a row existed.
    pub async fn delete(&self, owner: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM roster_snapshots WHERE owner = ?1")
            .bind(owner)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
