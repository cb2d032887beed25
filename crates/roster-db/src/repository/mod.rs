//! # Repository Module
//!
//! Repositories for the two records kept per signed-in identity.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Record Repositories                                  │
//! │                                                                         │
//! │  Orchestrator / agent                                                  │
//! │       │                                                                 │
//! │       │  db.snapshots().load(owner)                                    │
//! │       │  db.delta_logs().truncate(owner)                               │
//! │       ▼                                                                 │
//! │  SnapshotRepository          DeltaLogRepository                        │
//! │  ├── load(owner)             ├── load(owner)                           │
//! │  ├── save(owner, snapshot)   ├── save(owner, log)                      │
//! │  └── delete(owner)           ├── truncate(owner)                       │
//! │                              └── delete(owner)                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`SnapshotRepository`](snapshot::SnapshotRepository) - Merged roster
//! - [`DeltaLogRepository`](deltas::DeltaLogRepository) - Fragments and endpoint cache

pub mod deltas;
pub mod snapshot;
