//! Schema steps for the SQLite snapshot history.
//!
//! # Invariants
//! - Steps are listed in increasing `version` order with no gaps.
//! - `PRAGMA user_version` always equals the last step applied.
//! - Pending steps run in one transaction; a failing step applies nothing.

use crate::db::{DbError, DbResult};
use log::debug;
use rusqlite::Connection;
use std::cmp::Ordering;

/// One schema step: a SQL batch and the version it brings the file to.
struct SchemaStep {
    version: u32,
    sql: &'static str,
}

const STEPS: &[SchemaStep] = &[SchemaStep {
    version: 1,
    sql: include_str!("0001_snapshots.sql"),
}];

/// Schema version this build writes.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Schema version recorded in the database file.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?)
}

/// Brings the database up to `latest_version`, returning how many steps
/// ran.
///
/// # Errors
/// `UnsupportedSchemaVersion` when the file was written by a newer build.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<usize> {
    let found = schema_version(conn)?;
    let latest = latest_version();
    match found.cmp(&latest) {
        Ordering::Greater => {
            return Err(DbError::UnsupportedSchemaVersion {
                db_version: found,
                latest_supported: latest,
            })
        }
        Ordering::Equal => return Ok(0),
        Ordering::Less => {}
    }

    let pending: Vec<&SchemaStep> = STEPS.iter().filter(|step| step.version > found).collect();
    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
    }
    tx.commit()?;
    debug!(
        "event=db_migrate module=db status=ok from={found} to={latest} steps={}",
        pending.len()
    );
    Ok(pending.len())
}
