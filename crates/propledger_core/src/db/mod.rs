//! SQLite backing for the versioned snapshot history.
//!
//! # Responsibility
//! - Open connections with the pragmas the snapshot repository relies on.
//! - Keep the schema current through `migrations`.
//!
//! # Invariants
//! - No snapshot row is touched on a connection whose migrations failed.

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// The file was migrated by a newer build.
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}
