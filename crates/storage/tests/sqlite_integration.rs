use std::sync::Arc;

use quant_core::model::{ProgressPatch, UserId};
use quant_core::time::fixed_clock;
use serde_json::{Map, Value, json};
use storage::repository::{DocumentStore, KeyValueStore, Storage};
use storage::sqlite::SqliteRepository;
use storage::{DEFAULT_QUEUE_KEY, ProgressQueue};

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_key_value_round_trip() {
    let repo = connect("memdb_kv").await;

    assert_eq!(repo.get("current_user").await.unwrap(), None);
    repo.set("current_user", "uid-1").await.unwrap();
    repo.set("current_user", "uid-2").await.unwrap();
    assert_eq!(
        repo.get("current_user").await.unwrap().as_deref(),
        Some("uid-2")
    );

    repo.remove("current_user").await.unwrap();
    assert_eq!(repo.get("current_user").await.unwrap(), None);
}

#[tokio::test]
async fn sqlite_migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.set("k", "v").await.unwrap();
    repo.migrate().await.expect("second migrate");
    assert_eq!(repo.get("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn sqlite_documents_merge_like_remote_store() {
    let repo = connect("memdb_documents").await;
    let user = UserId::new("uid-1").unwrap();

    assert!(repo.read_document(&user).await.unwrap().is_none());

    repo.merge_write(
        &user,
        obj(json!({"xp": 10, "badges": ["a"], "progress": {"math1_lesson1": {"completed": true}}})),
    )
    .await
    .unwrap();
    repo.merge_write(
        &user,
        obj(json!({"xp": 25, "badges": ["b"], "progress": {"math1_lesson2": {"unlocked": true}}})),
    )
    .await
    .unwrap();

    let document = repo.read_document(&user).await.unwrap().unwrap();
    assert_eq!(
        Value::Object(document),
        json!({
            "xp": 25,
            "badges": ["b"],
            "progress": {
                "math1_lesson1": {"completed": true},
                "math1_lesson2": {"unlocked": true},
            },
        })
    );
}

#[tokio::test]
async fn sqlite_documents_are_per_user() {
    let repo = connect("memdb_documents_per_user").await;
    let alice = UserId::new("alice").unwrap();
    let bob = UserId::new("bob").unwrap();

    repo.merge_write(&alice, obj(json!({"xp": 1}))).await.unwrap();
    assert!(repo.read_document(&bob).await.unwrap().is_none());
}

#[tokio::test]
async fn progress_queue_persists_in_sqlite() {
    let repo = connect("memdb_queue").await;
    let queue = ProgressQueue::new(Arc::new(repo.clone())).with_clock(fixed_clock());

    queue
        .enqueue(ProgressPatch::normalize(&json!({"math1_lesson1": true})))
        .await
        .unwrap();
    queue
        .enqueue(ProgressPatch::normalize(&json!({"progress": {"math1_lesson2": true}})))
        .await
        .unwrap();

    // A second handle over the same database sees the same entries.
    let reopened = ProgressQueue::new(Arc::new(repo.clone()));
    let entries = reopened.read_all().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].patch().get("math1_lesson2"), Some(&json!(true)));

    reopened.clear().await.unwrap();
    assert!(queue.read_all().await.unwrap().is_empty());
    assert_eq!(
        repo.get(DEFAULT_QUEUE_KEY).await.unwrap().as_deref(),
        Some("[]")
    );
}

#[tokio::test]
async fn storage_sqlite_wires_both_stores() {
    let storage = Storage::sqlite("sqlite:file:memdb_storage?mode=memory&cache=shared")
        .await
        .expect("storage");
    let user = UserId::new("uid-9").unwrap();

    storage.local.set("k", "v").await.unwrap();
    storage
        .documents
        .merge_write(&user, obj(json!({"level": 2})))
        .await
        .unwrap();

    assert_eq!(storage.local.get("k").await.unwrap().as_deref(), Some("v"));
    let document = storage.documents.read_document(&user).await.unwrap().unwrap();
    assert_eq!(document.get("level"), Some(&json!(2)));
}
