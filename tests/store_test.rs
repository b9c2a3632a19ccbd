//! Tests for the SQLite mapping store.

use std::time::Duration;

use autoheal::store::{MappingStore, RemediationAction, StoreError, PATCH_REPLACE_KIND};

async fn open_temp_store() -> (MappingStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("healer").join("db.sqlite");
    let store = MappingStore::open(&db_path, Duration::from_secs(5))
        .await
        .expect("open store");
    (store, dir)
}

/// Direct connection for writing rows the store API would refuse.
async fn raw_pool(path: &std::path::Path) -> sqlx::SqlitePool {
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Delete);
    sqlx::SqlitePool::connect_with(options)
        .await
        .expect("raw connect")
}

fn oom_action() -> RemediationAction {
    RemediationAction::patch_replace("conf.yaml", "heap=512m", "heap=1024m")
}

#[tokio::test]
async fn open_creates_parent_dir_and_empty_table() {
    let (store, dir) = open_temp_store().await;

    assert!(dir.path().join("healer").join("db.sqlite").exists());
    let entries = store.list_entries().await.expect("list");
    assert!(entries.is_empty());
}

#[tokio::test]
async fn insert_assigns_ids_in_order_with_zero_hits() {
    let (store, _dir) = open_temp_store().await;

    let first = store
        .insert("OutOfMemoryError", &oom_action())
        .await
        .expect("insert first");
    let second = store
        .insert("Connection refused", &oom_action())
        .await
        .expect("insert second");

    assert!(second.id > first.id);
    assert_eq!(first.hit_count, 0);
    assert!(!first.created_at.is_empty());

    let entries = store.list_entries().await.expect("list");
    let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(entries[0].signature, "OutOfMemoryError");
    assert_eq!(entries[0].action, oom_action());
}

#[tokio::test]
async fn insert_rejects_empty_signature() {
    let (store, _dir) = open_temp_store().await;

    let err = store
        .insert("", &oom_action())
        .await
        .expect_err("empty signature must fail");
    assert!(matches!(err, StoreError::Validation(_)));

    assert!(store.list_entries().await.expect("list").is_empty());
}

#[tokio::test]
async fn insert_rejects_unsupported_action() {
    let (store, _dir) = open_temp_store().await;

    let action = RemediationAction::Unsupported {
        kind: "shell".to_owned(),
        reason: "not supported".to_owned(),
    };
    let err = store
        .insert("boom", &action)
        .await
        .expect_err("unsupported action must fail");
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(store.list_entries().await.expect("list").is_empty());
}

#[tokio::test]
async fn insert_rejects_empty_file_path() {
    let (store, _dir) = open_temp_store().await;

    let action = RemediationAction::patch_replace("", "a", "b");
    let err = store.insert("boom", &action).await.expect_err("must fail");
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn insert_accepts_empty_search_and_replace() {
    let (store, _dir) = open_temp_store().await;

    let action = RemediationAction::patch_replace("notes.txt", "", "");
    let entry = store.insert("boom", &action).await.expect("insert");
    let stored = store.get(entry.id).await.expect("get");
    assert_eq!(stored.action, action);
}

#[tokio::test]
async fn record_hit_increments_by_one() {
    let (store, _dir) = open_temp_store().await;
    let entry = store.insert("boom", &oom_action()).await.expect("insert");

    store.record_hit(entry.id).await.expect("hit 1");
    store.record_hit(entry.id).await.expect("hit 2");

    let stored = store.get(entry.id).await.expect("get");
    assert_eq!(stored.hit_count, 2);
}

#[tokio::test]
async fn record_hit_missing_id_is_not_found_and_changes_nothing() {
    let (store, _dir) = open_temp_store().await;
    let entry = store.insert("boom", &oom_action()).await.expect("insert");
    let before = store.list_entries().await.expect("list before");

    let missing = entry.id.saturating_add(100);
    let err = store.record_hit(missing).await.expect_err("must fail");
    assert!(matches!(err, StoreError::NotFound { id } if id == missing));

    let after = store.list_entries().await.expect("list after");
    assert_eq!(before, after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_hits_from_separate_handles_are_not_lost() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("db.sqlite");
    let setup = MappingStore::open(&db_path, Duration::from_secs(5))
        .await
        .expect("open");
    let entry = setup.insert("boom", &oom_action()).await.expect("insert");
    setup.close().await;

    // Each task opens its own handle, as separate CI runs would.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let path = db_path.clone();
        let id = entry.id;
        handles.push(tokio::spawn(async move {
            let store = MappingStore::open(&path, Duration::from_secs(30))
                .await
                .expect("open handle");
            for _ in 0..25 {
                store.record_hit(id).await.expect("record hit");
            }
            store.close().await;
        }));
    }
    for handle in handles {
        handle.await.expect("join");
    }

    let store = MappingStore::open(&db_path, Duration::from_secs(5))
        .await
        .expect("reopen");
    assert_eq!(store.get(entry.id).await.expect("get").hit_count, 200);
}

#[tokio::test]
async fn get_missing_id_is_not_found() {
    let (store, _dir) = open_temp_store().await;
    let err = store.get(42).await.expect_err("must fail");
    assert!(matches!(err, StoreError::NotFound { id: 42 }));
}

#[tokio::test]
async fn ids_are_not_reused_after_external_delete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("db.sqlite");
    let store = MappingStore::open(&db_path, Duration::from_secs(5))
        .await
        .expect("open");
    let first = store.insert("one", &oom_action()).await.expect("insert");
    store.close().await;

    // Administrative deletion happens outside the store API.
    let pool = raw_pool(&db_path).await;
    sqlx::query("DELETE FROM mappings WHERE id = ?1")
        .bind(first.id)
        .execute(&pool)
        .await
        .expect("delete");
    pool.close().await;

    let store = MappingStore::open(&db_path, Duration::from_secs(5))
        .await
        .expect("reopen");
    let second = store.insert("two", &oom_action()).await.expect("insert");
    assert!(second.id > first.id);
}

#[tokio::test]
async fn legacy_rows_decode_and_bad_actions_become_unsupported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("db.sqlite");
    let store = MappingStore::open(&db_path, Duration::from_secs(5))
        .await
        .expect("open");
    store.close().await;

    // Rows as written by earlier tooling: default hit_count and created_at.
    let pool = raw_pool(&db_path).await;
    for (signature, kind, payload) in [
        (
            "OutOfMemoryError",
            "patch_replace",
            r#"{"file": "conf.yaml", "search": "heap=512m", "replace": "heap=1024m"}"#,
        ),
        ("Segfault", "restart_service", r#"{"name": "api"}"#),
        ("Timeout", "patch_replace", "not json"),
        ("Missing", "patch_replace", r#"{"file": "a.txt", "search": "x"}"#),
    ] {
        sqlx::query(
            "INSERT INTO mappings (signature, action_type, action_payload) VALUES (?1, ?2, ?3)",
        )
        .bind(signature)
        .bind(kind)
        .bind(payload)
        .execute(&pool)
        .await
        .expect("raw insert");
    }
    pool.close().await;

    let store = MappingStore::open(&db_path, Duration::from_secs(5))
        .await
        .expect("reopen");
    let entries = store.list_entries().await.expect("list");
    assert_eq!(entries.len(), 4);

    assert_eq!(entries[0].action, oom_action());
    assert_eq!(entries[0].hit_count, 0);
    assert!(!entries[0].created_at.is_empty());

    assert!(matches!(
        &entries[1].action,
        RemediationAction::Unsupported { kind, .. } if kind == "restart_service"
    ));
    assert!(matches!(
        &entries[2].action,
        RemediationAction::Unsupported { kind, .. } if kind == PATCH_REPLACE_KIND
    ));
    assert!(matches!(
        &entries[3].action,
        RemediationAction::Unsupported { .. }
    ));
}

#[test]
fn decode_encode_patch_replace() {
    let action = oom_action();
    let (kind, payload) = action.encode().expect("encode");
    assert_eq!(kind, PATCH_REPLACE_KIND);
    assert_eq!(
        RemediationAction::decode(Some(kind.as_str()), Some(payload.as_str())),
        action
    );
}

#[test]
fn decode_missing_type_is_unsupported() {
    let action = RemediationAction::decode(None, None);
    assert!(matches!(action, RemediationAction::Unsupported { ref kind, .. } if kind.is_empty()));
}
