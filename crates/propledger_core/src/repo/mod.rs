//! Snapshot persistence.
//!
//! # Responsibility
//! - Define the snapshot storage contract used by the CLI.
//! - Keep file and SQLite details out of the store and services.
//!
//! # Invariants
//! - Only successfully serialized snapshots are written.

pub mod snapshot_repo;

pub use snapshot_repo::{
    BackupId, JsonFileSnapshotRepository, RepoError, RepoResult, SnapshotRepository,
    SqliteSnapshotRepository,
};
