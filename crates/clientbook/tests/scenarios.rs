//! End-to-end scenarios against the public API.

use std::sync::Arc;

use clientbook::{
    BackupDocument, Clock, FileArtifacts, KeyValueStore, MemoryStore, Notebook, SqliteStore,
    StorageKeys,
};
use tempfile::TempDir;

fn memory_notebook() -> (Arc<MemoryStore>, Notebook) {
    let store = Arc::new(MemoryStore::new());
    let notebook = Notebook::new(store.clone(), StorageKeys::default(), Clock::default());
    (store, notebook)
}

async fn snapshot(store: &MemoryStore) -> Vec<(String, Option<String>)> {
    let mut entries = Vec::new();
    for key in store.keys().await.unwrap() {
        let value = store.get(&key).await.unwrap();
        entries.push((key, value));
    }
    entries
}

#[tokio::test]
async fn ana_violino_scenario() {
    let (store, notebook) = memory_notebook();

    let ana = notebook.clients().add("Ana").await.unwrap();
    let violino = notebook.instruments().add(&ana.id, "Violino").await.unwrap();
    let note = notebook
        .notes()
        .upsert(&violino.id, "string trocada hoje", None)
        .await
        .unwrap()
        .into_note();

    let clients = notebook.clients().list().await.unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].label, "Ana");

    let instruments = notebook.instruments().list(&ana.id).await.unwrap();
    assert_eq!(instruments.len(), 1);
    assert_eq!(instruments[0].name, "Violino");

    let notes = notebook.notes().list_for(&violino.id).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].text, "string trocada hoje");
    assert_eq!(notes[0].id, note.id);
    assert!(notes[0].updated_at.is_none());

    assert_eq!(
        store.keys().await.unwrap(),
        vec![
            "Anotações".to_string(),
            "Clientes".to_string(),
            format!("instruments:{}", ana.id),
        ]
    );

    let document = notebook.backup().export().await.unwrap();
    assert_eq!(document.clients.len(), 1);
    assert_eq!(document.clients[0].id, ana.id);
    assert_eq!(document.instruments.len(), 1);
    assert_eq!(document.notes.len(), 1);
    assert_eq!(document.notes[0].instrument_id, violino.id);
}

#[tokio::test]
async fn client_removal_without_cascade_leaves_orphans() {
    let (_, notebook) = memory_notebook();
    let ana = notebook.clients().add("Ana").await.unwrap();
    let violino = notebook.instruments().add(&ana.id, "Violino").await.unwrap();
    notebook
        .notes()
        .upsert(&violino.id, "string trocada hoje", None)
        .await
        .unwrap();

    notebook.clients().remove(&ana.id).await.unwrap();

    assert!(notebook.clients().list().await.unwrap().is_empty());
    assert_eq!(
        notebook.instruments().list(&ana.id).await.unwrap(),
        vec![violino.clone()]
    );
    assert_eq!(notebook.notes().list_for(&violino.id).await.unwrap().len(), 1);

    // Orphans are not reachable from the client list, so backups skip them.
    let document = notebook.backup().export().await.unwrap();
    assert!(document.instruments.is_empty());
    assert_eq!(document.notes.len(), 1);
}

#[tokio::test]
async fn export_then_import_is_byte_stable() {
    let (source_store, source) = memory_notebook();
    let ana = source.clients().add("Ana").await.unwrap();
    let bia = source.clients().add("Bia").await.unwrap();
    let violino = source.instruments().add(&ana.id, "Violino").await.unwrap();
    source.instruments().add(&bia.id, "Cello").await.unwrap();
    let first = source
        .notes()
        .upsert(&violino.id, "string trocada hoje", None)
        .await
        .unwrap()
        .into_note();
    source
        .notes()
        .upsert(&violino.id, "cordas novas", Some(first.id.as_str()))
        .await
        .unwrap();

    let bytes = source.backup().export().await.unwrap().to_bytes().unwrap();

    let (target_store, target) = memory_notebook();
    target.backup().import_bytes(&bytes).await.unwrap();

    assert_eq!(snapshot(&target_store).await, snapshot(&source_store).await);
    let again = target.backup().export().await.unwrap().to_bytes().unwrap();
    assert_eq!(again, bytes);
}

#[tokio::test]
async fn legacy_records_survive_export_and_import() {
    let (store, notebook) = memory_notebook();
    let legacy = r#"[{"id":"1700000000000","text":"Ana","createdAt":"14/11/2023 19:13:20","sublist":[],"color":"red"}]"#;
    store.set("Clientes", legacy).await.unwrap();

    let document = notebook.backup().export().await.unwrap();
    assert_eq!(document.clients[0].label, "Ana");
    notebook.backup().import(&document).await.unwrap();
    assert_eq!(store.get("Clientes").await.unwrap().as_deref(), Some(legacy));

    let bytes = document.to_bytes().unwrap();
    notebook.backup().import_bytes(&bytes).await.unwrap();
    assert_eq!(store.get("Clientes").await.unwrap().as_deref(), Some(legacy));
}

#[tokio::test]
async fn corrupt_client_partition_is_repaired_then_writable() {
    let (store, notebook) = memory_notebook();
    store.set("Clientes", "{broken").await.unwrap();

    assert!(notebook.clients().add("Ana").await.unwrap_err().is_corrupt_partition());
    assert!(notebook.clients().list().await.unwrap_err().is_corrupt_partition());

    let discarded = notebook.repair().await.unwrap();
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].key, "Clientes");
    assert_eq!(discarded[0].value, "{broken");

    let ana = notebook.clients().add("Ana").await.unwrap();
    assert_eq!(notebook.clients().list().await.unwrap(), vec![ana]);
}

#[tokio::test]
async fn partial_backup_is_rejected_without_writes() {
    let (store, notebook) = memory_notebook();
    let ana = notebook.clients().add("Ana").await.unwrap();
    notebook.instruments().add(&ana.id, "Violino").await.unwrap();
    let before = snapshot(&store).await;

    let err = notebook
        .backup()
        .import_bytes(br#"{"clients":[{"id":"1","label":"X","createdAt":"t"}]}"#)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(snapshot(&store).await, before);
}

#[tokio::test]
async fn sqlite_store_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data").join("clientbook.db");

    let (client_id, instrument_id) = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let notebook = Notebook::new(store, StorageKeys::default(), Clock::default());
        let ana = notebook.clients().add("Ana").await.unwrap();
        let violino = notebook.instruments().add(&ana.id, "Violino").await.unwrap();
        notebook
            .notes()
            .upsert(&violino.id, "string trocada hoje", None)
            .await
            .unwrap();
        (ana.id, violino.id)
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    assert_eq!(store.stats().unwrap().keys, 3);
    let notebook = Notebook::new(store, StorageKeys::default(), Clock::default());

    assert_eq!(notebook.clients().get(&client_id).await.unwrap().label, "Ana");
    assert_eq!(
        notebook
            .instruments()
            .get(&client_id, &instrument_id)
            .await
            .unwrap()
            .name,
        "Violino"
    );
    assert_eq!(
        notebook.notes().list_for(&instrument_id).await.unwrap()[0].text,
        "string trocada hoje"
    );
}

#[tokio::test]
async fn backup_round_trip_through_files() {
    let dir = TempDir::new().unwrap();
    let artifacts = FileArtifacts::new(dir.path(), "backup.json");

    let (_, source) = memory_notebook();
    let ana = source.clients().add("Ana").await.unwrap();
    source.instruments().add(&ana.id, "Violino").await.unwrap();
    let (location, summary) = source.backup().export_to(&artifacts).await.unwrap();
    assert_eq!(summary.clients, 1);
    assert_eq!(summary.instruments, 1);

    let (_, target) = memory_notebook();
    let imported = target
        .backup()
        .import_from(&artifacts, &location)
        .await
        .unwrap();
    assert_eq!(imported, summary);

    let raw = std::fs::read(&location).unwrap();
    let document = BackupDocument::parse(&raw).unwrap();
    assert_eq!(document, target.backup().export().await.unwrap());
}
