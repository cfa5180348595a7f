//! End-to-end behaviour of `DocumentStore` against a file-backed database.

#![allow(unused_results)]

use std::collections::BTreeMap;
use std::time::Duration;

use assert_matches::assert_matches;
use proptest::prelude::*;

use docstore_settings::{StoreSettings, load_settings_from_path};
use docstore_store::{
    ConnectionPool, Document, DocumentStore, SchemaState, StoreError, UpsertSummary, WorkerId,
};

fn settings_in(dir: &tempfile::TempDir) -> StoreSettings {
    let path = dir.path().join("documents.db");
    let mut settings = StoreSettings::for_path(path.to_str().unwrap());
    settings.pool.acquire_timeout_ms = 2_000;
    settings
}

fn open(dir: &tempfile::TempDir) -> DocumentStore {
    DocumentStore::open(&settings_in(dir)).unwrap()
}

fn fetch_map(
    store: &DocumentStore,
    worker: &WorkerId,
    keys: &[&str],
) -> BTreeMap<Vec<u8>, Vec<u8>> {
    store
        .fetch(worker, keys)
        .unwrap()
        .map(|doc| (doc.key, doc.payload))
        .collect()
}

#[test]
fn upsert_then_fetch_omits_missing_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let w = WorkerId::from("w1");

    store
        .upsert(
            &w,
            &[
                Document::new(b"key1".to_vec(), b"\x00\x01".to_vec()),
                Document::new(b"key2".to_vec(), b"\x02\x03".to_vec()),
            ],
        )
        .unwrap();

    let found: Vec<Document> = store.fetch(&w, &[b"key1", b"key3"]).unwrap().collect();
    assert_eq!(found, vec![Document::new(b"key1".to_vec(), vec![0u8, 1])]);
}

#[test]
fn fetch_of_nothing_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let none: Vec<Vec<u8>> = Vec::new();
    assert_eq!(store.fetch(&WorkerId::from("w"), &none).unwrap().len(), 0);
}

#[test]
fn second_upsert_keeps_first_payload() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let w = WorkerId::from("w");

    store.upsert(&w, &[Document::new("k", "first")]).unwrap();
    let summary = store.upsert(&w, &[Document::new("k", "second")]).unwrap();
    assert_eq!(summary, UpsertSummary { inserted: 0, conflicted: 1 });

    let map = fetch_map(&store, &w, &["k"]);
    assert_eq!(map[b"k".as_slice()], b"first");
}

#[test]
fn large_fetch_with_repeated_keys_returns_each_document_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let w = WorkerId::from("w");
    let stored: Vec<Document> = (0..50)
        .map(|i| Document::new(format!("k{i}"), format!("v{i}")))
        .collect();
    store.upsert(&w, &stored).unwrap();

    // every stored key three times over, padded with misses past one statement
    let mut keys: Vec<String> = Vec::new();
    for _ in 0..3 {
        keys.extend((0..50).map(|i| format!("k{i}")));
        keys.extend((0..250).map(|i| format!("missing{i}")));
    }
    assert!(keys.len() > 500);

    let found: Vec<Document> = store.fetch(&w, &keys).unwrap().collect();
    assert_eq!(found.len(), 50);
    let map: BTreeMap<Vec<u8>, Vec<u8>> = found.into_iter().map(|d| (d.key, d.payload)).collect();
    assert_eq!(map.len(), 50);
    assert_eq!(map[b"k7".as_slice()], b"v7");
}

#[test]
fn remove_missing_key_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let w = WorkerId::from("w");
    store.upsert(&w, &[Document::new("keep", "v")]).unwrap();

    assert_eq!(store.remove(&w, &["absent"]).unwrap(), 0);
    assert_eq!(store.remove(&w, &["keep", "absent"]).unwrap(), 1);
    assert!(fetch_map(&store, &w, &["keep"]).is_empty());
}

#[test]
fn flush_blocks_data_ops_until_schema_is_restored() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let w = WorkerId::from("w");
    store.upsert(&w, &[Document::new("k", "v")]).unwrap();

    store.flush(&w).unwrap();
    assert_eq!(store.state(), SchemaState::Flushed);
    assert_matches!(store.fetch(&w, &["k"]), Err(StoreError::SchemaMissing { .. }));

    store.ensure_schema(&w).unwrap();
    assert!(fetch_map(&store, &w, &["k"]).is_empty());
    store.upsert(&w, &[Document::new("k", "again")]).unwrap();
    assert_eq!(fetch_map(&store, &w, &["k"])[b"k".as_slice()], b"again");
}

#[test]
fn ensure_schema_is_idempotent_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let first = open(&dir);
    first.upsert(&WorkerId::from("w"), &[Document::new("k", "v")]).unwrap();

    let second = open(&dir);
    second.ensure_schema(&WorkerId::from("w")).unwrap();
    assert_eq!(fetch_map(&second, &WorkerId::from("w"), &["k"]).len(), 1);
}

#[test]
fn concurrent_workers_upsert_distinct_keys() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_in(&dir);
    settings.pool.max_connections = 4;
    let store = DocumentStore::open(&settings).unwrap();
    let threads = 8;

    std::thread::scope(|scope| {
        for i in 0..threads {
            let store = &store;
            scope.spawn(move || {
                let worker = WorkerId::for_current_thread();
                store
                    .upsert(&worker, &[Document::new(format!("key-{i}"), format!("payload-{i}"))])
                    .unwrap();
            });
        }
    });

    let keys: Vec<String> = (0..threads).map(|i| format!("key-{i}")).collect();
    let found: Vec<Document> = store.fetch(&WorkerId::from("reader"), &keys).unwrap().collect();
    assert_eq!(found.len(), threads);
    assert!(store.pool_status().connections <= 4);
}

#[test]
fn concurrent_upserts_of_one_key_keep_a_single_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    std::thread::scope(|scope| {
        for i in 0..4 {
            let store = &store;
            scope.spawn(move || {
                let worker = WorkerId::for_current_thread();
                store
                    .upsert(&worker, &[Document::new("contended", format!("writer-{i}"))])
                    .unwrap();
            });
        }
    });

    let w = WorkerId::from("reader");
    let found: Vec<Document> = store.fetch(&w, &["contended"]).unwrap().collect();
    assert_eq!(found.len(), 1);
    assert!(found[0].payload.starts_with(b"writer-"));
    assert_eq!(store.report_metrics(&w).unwrap().row_count, 1);
}

#[test]
fn non_utf8_key_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let w = WorkerId::from("w");
    assert_matches!(
        store.upsert(&w, &[Document::new(vec![0xc3u8, 0x28], "v")]),
        Err(StoreError::MalformedBatch(_))
    );
    assert_eq!(store.report_metrics(&w).unwrap().row_count, 0);
}

#[test]
fn mismatched_batch_is_malformed() {
    assert_matches!(
        Document::zip(vec!["a", "b"], vec!["only one"]),
        Err(StoreError::MalformedBatch(_))
    );
}

#[test]
fn pool_exhaustion_surfaces_after_wait() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_in(&dir);
    settings.pool.min_connections = 0;
    settings.pool.max_connections = 1;
    settings.pool.acquire_timeout_ms = 100;
    let pool = ConnectionPool::new(&settings).unwrap();

    let held = pool.acquire(&WorkerId::from("holder")).unwrap();
    let err = pool.acquire(&WorkerId::from("waiter")).unwrap_err();
    assert_matches!(err, StoreError::PoolExhausted { waited_ms, .. } if waited_ms >= 100);

    pool.release(held);
    let waiter = pool.acquire(&WorkerId::from("waiter")).unwrap();
    waiter.probe().unwrap();
    assert_eq!(pool.status().max_size, 1);
}

#[test]
fn waiting_worker_is_served_when_slot_frees() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_in(&dir);
    settings.pool.min_connections = 0;
    settings.pool.max_connections = 1;
    let pool = ConnectionPool::new(&settings).unwrap();

    let held = pool.acquire(&WorkerId::from("holder")).unwrap();
    std::thread::scope(|scope| {
        let waiter = scope.spawn(|| pool.acquire(&WorkerId::from("waiter")).map(|h| h.id()));
        std::thread::sleep(Duration::from_millis(100));
        pool.release(held);
        assert!(waiter.join().unwrap().is_ok());
    });
}

#[test]
fn reentrant_acquire_reuses_the_worker_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_in(&dir);
    settings.pool.min_connections = 0;
    settings.pool.max_connections = 1;
    settings.pool.acquire_timeout_ms = 200;
    let pool = ConnectionPool::new(&settings).unwrap();
    let w = WorkerId::from("w");

    let outer = pool.acquire(&w).unwrap();
    let inner = pool.acquire(&w).unwrap();
    assert_eq!(inner.id(), outer.id());
    inner.probe().unwrap();
    assert_eq!(pool.status().connections, 1);

    pool.release(inner);
    pool.release(outer);
    assert_eq!(pool.status().parked_workers, 1);
}

#[test]
fn open_from_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    let db_path = dir.path().join("from-file.db");
    std::fs::write(&settings_path, settings_json(db_path.to_str().unwrap())).unwrap();

    let settings = load_settings_from_path(&settings_path).unwrap();
    assert_eq!(settings.table, "addresses");
    let store = DocumentStore::open(&settings).unwrap();
    assert_eq!(store.table().as_str(), "addresses");
    store.upsert(&WorkerId::from("w"), &[Document::new("k", "v")]).unwrap();
    assert!(db_path.exists());
}

fn settings_json(db_path: &str) -> String {
    format!(
        r#"{{"databasePath": {db_path:?}, "table": "addresses", "pool": {{"maxConnections": 2}}}}"#
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn partial_conflict_stores_new_and_keeps_existing(
        existing in prop::collection::btree_set("[a-z0-9]{1,8}", 1..12),
        fresh in prop::collection::btree_set("[A-Z0-9]{1,8}", 1..12),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let w = WorkerId::from("prop");

        let old: Vec<Document> = existing.iter().map(|k| Document::new(k.as_str(), "old")).collect();
        store.upsert(&w, &old).unwrap();

        // digits-only keys may appear in both sets; those count as existing
        let mut batch: Vec<Document> = fresh.iter().map(|k| Document::new(k.as_str(), "new")).collect();
        batch.extend(existing.iter().map(|k| Document::new(k.as_str(), "clobber")));
        let summary = store.upsert(&w, &batch).unwrap();

        let truly_fresh = fresh.difference(&existing).count();
        prop_assert_eq!(summary.inserted, truly_fresh);

        let all: Vec<&str> = existing.iter().chain(fresh.iter()).map(String::as_str).collect();
        let map = fetch_map(&store, &w, &all);
        for k in &existing {
            prop_assert_eq!(&map[k.as_bytes()], b"old");
        }
        for k in fresh.difference(&existing) {
            prop_assert_eq!(&map[k.as_bytes()], b"new");
        }
    }
}
