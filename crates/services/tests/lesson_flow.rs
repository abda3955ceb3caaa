use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quant_core::model::{AuthUser, LessonId, LessonReward, UserId};
use quant_core::time::fixed_clock;
use serde_json::{Map, Value, json};
use services::{AppServices, LessonCompletion, SyncConfig};
use storage::repository::{DocumentStore, InMemoryRepository, Storage, StorageError};

fn setup() -> (InMemoryRepository, AppServices) {
    let repo = InMemoryRepository::new();
    let storage = Storage {
        local: Arc::new(repo.clone()),
        documents: Arc::new(repo.clone()),
    };
    let services = AppServices::from_storage(&storage, fixed_clock(), &SyncConfig::default());
    (repo, services)
}

fn student() -> AuthUser {
    AuthUser::new(UserId::new("student").unwrap()).with_display_name("Student")
}

fn lesson(raw: &str) -> LessonId {
    LessonId::new(raw).unwrap()
}

async fn document(repo: &InMemoryRepository) -> Value {
    Value::Object(
        repo.read_document(&student().uid)
            .await
            .unwrap()
            .unwrap_or_default(),
    )
}

#[tokio::test]
async fn completing_a_lesson_awards_xp_badge_and_unlocks_next() {
    let (repo, services) = setup();
    services.auth().sign_in(student()).await;
    assert!(services.profiles().ensure_user_document(&student()).await);

    let reward = LessonReward::new(150).with_badge("Vector Master");
    let outcome = services
        .lessons()
        .complete_lesson(&lesson("math1_lesson1"), &reward)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        LessonCompletion::Completed {
            xp: 150,
            level: 2,
            new_badge: Some("Vector Master".into()),
        }
    );

    let doc = document(&repo).await;
    assert_eq!(doc["xp"], json!(150));
    assert_eq!(doc["level"], json!(2));
    assert_eq!(doc["badges"], json!(["Vector Master"]));
    assert_eq!(doc["name"], json!("Student"));
    assert_eq!(
        doc["progress"],
        json!({
            "math1_lesson1": {"completed": true, "completedAt": 1_700_000_000_000_i64},
            "math1_lesson2": {"unlocked": true},
        })
    );

    let profile = services.profiles().load_profile().await.unwrap().unwrap();
    assert_eq!(profile.completed_lessons(), 1);
}

#[tokio::test]
async fn completing_twice_does_not_double_award() {
    let (repo, services) = setup();
    services.auth().sign_in(student()).await;
    let lessons = services.lessons();
    let reward = LessonReward::default();

    lessons
        .complete_lesson(&lesson("math1_lesson1"), &reward)
        .await
        .unwrap();
    let writes = repo.merge_write_count();

    let again = lessons
        .complete_lesson(&lesson("math1_lesson1"), &reward)
        .await
        .unwrap();
    assert_eq!(again, LessonCompletion::AlreadyCompleted);
    assert_eq!(repo.merge_write_count(), writes);
    assert_eq!(document(&repo).await["xp"], json!(20));
}

#[tokio::test]
async fn offline_completion_is_rewarded_once_after_sign_in() {
    let (repo, services) = setup();
    services.auth().sign_in(student()).await;
    assert!(services.profiles().ensure_user_document(&student()).await);
    services.auth().sign_out().await;

    let lessons = services.lessons();
    let reward = LessonReward::new(50).with_badge("Vector Master");
    let outcome = lessons
        .complete_lesson(&lesson("math1_lesson1"), &reward)
        .await
        .unwrap();
    let LessonCompletion::Deferred(saved) = outcome else {
        panic!("expected deferred completion, got {outcome:?}");
    };
    assert!(saved.ok && saved.queued);
    assert_eq!(
        services
            .progress()
            .rewards()
            .completions()
            .read_all()
            .await
            .unwrap()
            .len(),
        1
    );

    services.auth().sign_in(student()).await;
    assert!(services.progress().flush_queued_progress().await);

    let again = lessons
        .complete_lesson(&lesson("math1_lesson1"), &reward)
        .await
        .unwrap();
    assert_eq!(again, LessonCompletion::AlreadyCompleted);
    assert!(!services.progress().flush_queued_progress().await);

    let doc = document(&repo).await;
    assert_eq!(doc["xp"], json!(50));
    assert_eq!(doc["badges"], json!(["Vector Master"]));
    assert_eq!(doc["progress"]["math1_lesson1"]["completed"], json!(true));
    assert_eq!(doc["progress"]["math1_lesson2"]["unlocked"], json!(true));
    assert!(
        services
            .progress()
            .rewards()
            .completions()
            .read_all()
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn lessons_completed_twice_offline_are_rewarded_once() {
    let (repo, services) = setup();
    let lessons = services.lessons();
    for _ in 0..2 {
        lessons
            .complete_lesson(&lesson("math1_lesson1"), &LessonReward::default())
            .await
            .unwrap();
    }
    lessons
        .complete_lesson(&lesson("math1_lesson2"), &LessonReward::default())
        .await
        .unwrap();

    services.auth().sign_in(student()).await;
    assert!(services.progress().flush_queued_progress().await);
    assert_eq!(document(&repo).await["xp"], json!(40));
}

#[tokio::test]
async fn completion_degrades_to_queue_when_store_is_down() {
    let (repo, services) = setup();
    services.auth().sign_in(student()).await;
    repo.set_documents_online(false);

    let outcome = services
        .lessons()
        .complete_lesson(&lesson("stats_lesson4"), &LessonReward::default())
        .await
        .unwrap();
    let LessonCompletion::Deferred(saved) = outcome else {
        panic!("expected deferred completion, got {outcome:?}");
    };
    assert!(!saved.ok);
    assert!(saved.queued);
    assert!(!services.progress().flush_queued_progress().await);

    repo.set_documents_online(true);
    assert!(services.progress().flush_queued_progress().await);
    let doc = document(&repo).await;
    assert_eq!(doc["progress"]["stats_lesson5"], json!({"unlocked": true}));
    assert_eq!(doc["xp"], json!(20));
}

/// Delays every document read so concurrent completions overlap.
struct SlowReads {
    inner: InMemoryRepository,
    delay: Duration,
}

#[async_trait]
impl DocumentStore for SlowReads {
    async fn read_document(
        &self,
        user: &UserId,
    ) -> Result<Option<Map<String, Value>>, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_document(user).await
    }

    async fn merge_write(
        &self,
        user: &UserId,
        partial: Map<String, Value>,
    ) -> Result<(), StorageError> {
        self.inner.merge_write(user, partial).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_accumulate_xp() {
    let repo = InMemoryRepository::new();
    let storage = Storage {
        local: Arc::new(repo.clone()),
        documents: Arc::new(SlowReads {
            inner: repo.clone(),
            delay: Duration::from_millis(30),
        }),
    };
    let services = AppServices::from_storage(&storage, fixed_clock(), &SyncConfig::default());
    services.auth().sign_in(student()).await;

    let tasks: Vec<_> = ["math1_lesson1", "math2_lesson1", "stats_lesson1"]
        .into_iter()
        .map(|raw| {
            let lessons = services.lessons();
            tokio::spawn(async move {
                lessons
                    .complete_lesson(&lesson(raw), &LessonReward::new(40))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        assert!(matches!(
            task.await.unwrap(),
            LessonCompletion::Completed { .. }
        ));
    }

    let doc = document(&repo).await;
    assert_eq!(doc["xp"], json!(120));
    assert_eq!(doc["level"], json!(2));
}
