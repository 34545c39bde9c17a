use propledger_core::db::migrations::{apply_migrations, latest_version, schema_version};
use propledger_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn fresh_database_gets_the_snapshot_history_table() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn).unwrap(), latest_version());
    let columns = snapshot_columns(&conn);
    assert_eq!(columns, vec!["version", "body", "created_at", "label"]);
}

#[test]
fn foreign_keys_are_enforced_on_every_connection() {
    let conn = open_db_in_memory().unwrap();
    let enabled: bool = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert!(enabled);
}

#[test]
fn reopening_keeps_existing_snapshot_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.db");

    let conn = open_db(&path).unwrap();
    conn.execute(
        "INSERT INTO snapshots (body, created_at) VALUES ('{}', '2026-01-01T00:00:00Z');",
        [],
    )
    .unwrap();
    drop(conn);

    let mut conn = open_db(&path).unwrap();
    assert_eq!(apply_migrations(&mut conn).unwrap(), 0);
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM snapshots;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn database_from_a_newer_build_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");
    Connection::open(&path)
        .unwrap()
        .pragma_update(None, "user_version", 42)
        .unwrap();

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 42);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn snapshot_columns(conn: &Connection) -> Vec<String> {
    let mut stmt = conn.prepare("PRAGMA table_info(snapshots);").unwrap();
    let names = stmt.query_map([], |row| row.get::<_, String>(1)).unwrap();
    names.collect::<Result<Vec<_>, _>>().unwrap()
}
