use propledger_core::db::open_db_in_memory;
use propledger_core::{
    BackupId, EntityKind, GraphStore, JsonFileSnapshotRepository, Key, RepoError,
    SnapshotRepository, SqliteSnapshotRepository,
};
use serde_json::{json, Map, Value};

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

fn store_with_owner(name: &str) -> GraphStore {
    let mut store = GraphStore::new();
    store
        .upsert(
            EntityKind::Owner,
            Some(&Key::natural(name)),
            &fields(json!({"taxId": "12-3456789"})),
        )
        .unwrap();
    store
}

#[test]
fn missing_json_snapshot_reads_as_empty_registry() {
    let dir = tempfile::tempdir().unwrap();
    let repo = JsonFileSnapshotRepository::new(dir.path().join("registry.json"));

    let store = repo.load_store().unwrap();
    assert!(store.is_empty());
    assert_eq!(repo.backup().unwrap(), None);
}

#[test]
fn json_repository_roundtrips_and_restores_backups() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");
    let repo = JsonFileSnapshotRepository::new(&path);

    let original = store_with_owner("Acme Holdings");
    repo.save_store(&original).unwrap();
    assert_eq!(repo.load_store().unwrap(), original);

    let backup = repo.backup().unwrap().unwrap();
    assert!(backup.0.starts_with("registry.backup-"));
    assert_eq!(repo.list_backups().unwrap(), vec![backup.clone()]);

    repo.save_store(&store_with_owner("Someone Else")).unwrap();
    assert_ne!(repo.load_store().unwrap(), original);

    repo.restore(&backup).unwrap();
    assert_eq!(repo.load_store().unwrap(), original);
}

#[test]
fn json_backups_taken_back_to_back_do_not_overwrite_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let repo = JsonFileSnapshotRepository::new(dir.path().join("registry.json"));
    repo.save_store(&store_with_owner("Acme Holdings")).unwrap();

    let first = repo.backup().unwrap().unwrap();
    let second = repo.backup().unwrap().unwrap();
    assert_ne!(first, second);
    assert_eq!(repo.list_backups().unwrap().len(), 2);
}

#[test]
fn json_repository_rejects_corrupt_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");
    std::fs::write(&path, r#"{"owners": {"own-1": {"name": "No id"}}}"#).unwrap();

    let err = JsonFileSnapshotRepository::new(&path).load_store().unwrap_err();
    assert!(matches!(err, RepoError::Schema(_)));
}

#[test]
fn written_snapshot_keeps_unknown_top_level_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");
    std::fs::write(&path, r#"{"schemaNote": "v2", "tenants": {}}"#).unwrap();
    let repo = JsonFileSnapshotRepository::new(&path);

    let store = repo.load_store().unwrap();
    repo.save_store(&store).unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, json!({"schemaNote": "v2", "tenants": {}}));
}

#[test]
fn sqlite_repository_keeps_versions_and_restores_them() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSnapshotRepository::new(&conn);
    assert!(repo.load_store().unwrap().is_empty());
    assert_eq!(repo.backup().unwrap(), None);

    let original = store_with_owner("Acme Holdings");
    repo.save_store(&original).unwrap();
    let backup = repo.backup().unwrap().unwrap();

    repo.save_store(&store_with_owner("Someone Else")).unwrap();
    assert_eq!(repo.list_backups().unwrap().len(), 2);

    repo.restore(&backup).unwrap();
    assert_eq!(repo.load_store().unwrap(), original);
    assert_eq!(repo.list_backups().unwrap().len(), 3);

    let label: String = conn
        .query_row(
            "SELECT label FROM snapshots ORDER BY version DESC LIMIT 1;",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(label, format!("restored-from-{backup}"));
}

#[test]
fn sqlite_restore_of_unknown_version_fails() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSnapshotRepository::new(&conn);

    for raw in ["42", "latest"] {
        let err = repo.restore(&BackupId(raw.to_string())).unwrap_err();
        assert!(matches!(err, RepoError::BackupNotFound(_)));
    }
}
