//! Snapshot repository contracts and file/SQLite implementations.
//!
//! # Responsibility
//! - Read and write whole registry snapshots.
//! - Take and restore backups before risky batch applications.
//!
//! # Invariants
//! - A missing snapshot reads as an empty registry.
//! - Writes replace the stored snapshot atomically; a failed write leaves the
//!   previous snapshot intact.
//! - Restore validates the backup parses before it replaces anything.

use crate::db::DbError;
use crate::error::SchemaError;
use crate::model::entity::EntityKind;
use crate::store::{GraphStore, Snapshot};
use chrono::Utc;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("snapshot io failed at `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("snapshot encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("backup not found: {0}")]
    BackupNotFound(BackupId),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RepoError + '_ {
    move |source| RepoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Opaque backup handle: a file name for JSON storage, a version number for
/// SQLite storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BackupId(pub String);

impl Display for BackupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Repository interface for whole-snapshot persistence.
pub trait SnapshotRepository {
    fn read(&self) -> RepoResult<Snapshot>;
    fn write(&self, snapshot: &Snapshot) -> RepoResult<()>;
    /// Copies the current snapshot aside. `None` when there is nothing to
    /// back up yet.
    fn backup(&self) -> RepoResult<Option<BackupId>>;
    fn restore(&self, backup: &BackupId) -> RepoResult<()>;
    /// Known backups, oldest first.
    fn list_backups(&self) -> RepoResult<Vec<BackupId>>;

    /// Reads and loads the snapshot into a store.
    fn load_store(&self) -> RepoResult<GraphStore> {
        Ok(GraphStore::load(self.read()?)?)
    }

    /// Serializes the store and writes it. Nothing is written if
    /// serialization fails.
    fn save_store(&self, store: &GraphStore) -> RepoResult<()> {
        let snapshot = store.serialize()?;
        self.write(&snapshot)
    }
}

fn entity_total(snapshot: &Snapshot) -> usize {
    EntityKind::ALL
        .iter()
        .map(|kind| snapshot.record_count(*kind))
        .sum()
}

/// Pretty-printed JSON file with sibling backup copies.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotRepository {
    path: PathBuf,
}

impl JsonFileSnapshotRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn backup_prefix(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        format!("{stem}.backup-")
    }

    fn is_backup_name(&self, name: &str) -> bool {
        name.starts_with(&self.backup_prefix())
            && name.ends_with(".json")
            && !name.contains(['/', '\\'])
    }

    fn replace_contents(&self, contents: &str) -> RepoResult<()> {
        let directory = self.directory();
        let mut temp = NamedTempFile::new_in(&directory).map_err(io_error(&directory))?;
        temp.write_all(contents.as_bytes())
            .and_then(|()| temp.as_file().sync_all())
            .map_err(io_error(temp.path()))?;
        temp.persist(&self.path)
            .map_err(|err| io_error(&self.path)(err.error))?;
        Ok(())
    }
}

impl SnapshotRepository for JsonFileSnapshotRepository {
    fn read(&self) -> RepoResult<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(io_error(&self.path))?;
        Ok(Snapshot::from_json_str(&raw)?)
    }

    fn write(&self, snapshot: &Snapshot) -> RepoResult<()> {
        let contents = snapshot.to_json_string_pretty()?;
        self.replace_contents(&contents)?;
        info!(
            "event=snapshot_write module=repo status=ok backend=json entities={}",
            entity_total(snapshot)
        );
        Ok(())
    }

    fn backup(&self) -> RepoResult<Option<BackupId>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let directory = self.directory();
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let base = format!("{}{stamp}", self.backup_prefix());
        let mut name = format!("{base}.json");
        let mut attempt = 1;
        while directory.join(&name).exists() {
            name = format!("{base}-{attempt}.json");
            attempt += 1;
        }
        let target = directory.join(&name);
        std::fs::copy(&self.path, &target).map_err(io_error(&target))?;
        info!("event=snapshot_backup module=repo status=ok backend=json");
        Ok(Some(BackupId(name)))
    }

    fn restore(&self, backup: &BackupId) -> RepoResult<()> {
        let source = self.directory().join(&backup.0);
        if !self.is_backup_name(&backup.0) || !source.is_file() {
            return Err(RepoError::BackupNotFound(backup.clone()));
        }
        let raw = std::fs::read_to_string(&source).map_err(io_error(&source))?;
        Snapshot::from_json_str(&raw)?;
        self.replace_contents(&raw)?;
        info!("event=snapshot_restore module=repo status=ok backend=json");
        Ok(())
    }

    fn list_backups(&self) -> RepoResult<Vec<BackupId>> {
        let directory = self.directory();
        let entries = std::fs::read_dir(&directory).map_err(io_error(&directory))?;
        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(&directory))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_backup_name(&name) {
                backups.push(BackupId(name));
            }
        }
        backups.sort();
        Ok(backups)
    }
}

/// SQLite-backed snapshot history. Every write appends a version row; the
/// latest row is the current snapshot.
pub struct SqliteSnapshotRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSnapshotRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn append(&self, body: &str, label: Option<&str>) -> RepoResult<i64> {
        self.conn.execute(
            "INSERT INTO snapshots (body, created_at, label) VALUES (?1, ?2, ?3);",
            params![body, Utc::now().to_rfc3339(), label],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn latest_version(&self) -> RepoResult<Option<i64>> {
        let version = self
            .conn
            .query_row("SELECT MAX(version) FROM snapshots;", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?;
        Ok(version)
    }
}

impl SnapshotRepository for SqliteSnapshotRepository<'_> {
    fn read(&self) -> RepoResult<Snapshot> {
        let body = self
            .conn
            .query_row(
                "SELECT body FROM snapshots ORDER BY version DESC LIMIT 1;",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Snapshot::from_json_str(&body)?),
            None => Ok(Snapshot::new()),
        }
    }

    fn write(&self, snapshot: &Snapshot) -> RepoResult<()> {
        let body = snapshot.to_json_string_pretty()?;
        let version = self.append(&body, None)?;
        info!(
            "event=snapshot_write module=repo status=ok backend=sqlite version={version} entities={}",
            entity_total(snapshot)
        );
        Ok(())
    }

    fn backup(&self) -> RepoResult<Option<BackupId>> {
        let Some(version) = self.latest_version()? else {
            return Ok(None);
        };
        self.conn.execute(
            "UPDATE snapshots SET label = COALESCE(label, 'backup') WHERE version = ?1;",
            params![version],
        )?;
        info!("event=snapshot_backup module=repo status=ok backend=sqlite version={version}");
        Ok(Some(BackupId(version.to_string())))
    }

    fn restore(&self, backup: &BackupId) -> RepoResult<()> {
        let not_found = || RepoError::BackupNotFound(backup.clone());
        let version: i64 = backup.0.trim().parse().map_err(|_| not_found())?;
        let body = self
            .conn
            .query_row(
                "SELECT body FROM snapshots WHERE version = ?1;",
                params![version],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .ok_or_else(not_found)?;
        Snapshot::from_json_str(&body)?;
        let restored = self.append(&body, Some(format!("restored-from-{version}").as_str()))?;
        info!(
            "event=snapshot_restore module=repo status=ok backend=sqlite from={version} version={restored}"
        );
        Ok(())
    }

    fn list_backups(&self) -> RepoResult<Vec<BackupId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT version FROM snapshots ORDER BY version ASC;")?;
        let versions = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut backups = Vec::new();
        for version in versions {
            backups.push(BackupId(version?.to_string()));
        }
        Ok(backups)
    }
}
