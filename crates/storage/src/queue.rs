//! Durable local queues of work awaiting a remote write.
//!
//! Each queue lives under one key of a [`KeyValueStore`] as a JSON array,
//! oldest first. Progress entries look like `{"t": <epoch-ms>, "patch": {..}}`;
//! pending lesson completions carry the lesson id, timestamp and reward.

use std::sync::Arc;

use quant_core::Clock;
use quant_core::model::{PendingCompletion, ProgressPatch, QueueEntry};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::repository::{KeyValueStore, StorageError};

/// Storage key used when none is configured.
pub const DEFAULT_QUEUE_KEY: &str = "qq_progress_queue_v1";

/// Storage key for pending lesson completions when none is configured.
pub const DEFAULT_COMPLETION_QUEUE_KEY: &str = "qq_completion_queue_v1";

/// Ordered, append-only buffer of patches over a key-value store.
///
/// `enqueue` is a read-modify-write; callers that may enqueue and clear
/// concurrently must serialize those calls themselves.
#[derive(Clone)]
pub struct ProgressQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    clock: Clock,
}

impl ProgressQueue {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, DEFAULT_QUEUE_KEY)
    }

    #[must_use]
    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            clock: Clock::default(),
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append `patch`, stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the queue cannot be read or written back.
    pub async fn enqueue(&self, patch: ProgressPatch) -> Result<QueueEntry, StorageError> {
        let mut entries = self.read_all().await?;
        let entry = QueueEntry::new(self.clock.now(), patch);
        entries.push(entry.clone());
        write_list(self.store.as_ref(), &self.key, entries.as_slice()).await?;
        tracing::debug!(key = %self.key, pending = entries.len(), "queued progress patch");
        Ok(entry)
    }

    /// All pending entries in insertion order.
    ///
    /// A missing or unparseable value reads as an empty queue; the next
    /// successful write replaces it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` only if the backing store itself fails.
    pub async fn read_all(&self) -> Result<Vec<QueueEntry>, StorageError> {
        read_list(self.store.as_ref(), &self.key).await
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store fails.
    pub async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.read_all().await?.len())
    }

    /// Drop every pending entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the empty queue cannot be written.
    pub async fn clear(&self) -> Result<(), StorageError> {
        write_list::<QueueEntry>(self.store.as_ref(), &self.key, &[]).await
    }
}

/// Lesson completions whose rewards are still owed to the user's document.
#[derive(Clone)]
pub struct CompletionQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl CompletionQueue {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, DEFAULT_COMPLETION_QUEUE_KEY)
    }

    #[must_use]
    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append `completion` at the end of the queue.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the queue cannot be read or written back.
    pub async fn push(&self, completion: PendingCompletion) -> Result<(), StorageError> {
        let mut pending = self.read_all().await?;
        pending.push(completion);
        self.replace(&pending).await?;
        tracing::debug!(key = %self.key, pending = pending.len(), "queued lesson completion");
        Ok(())
    }

    /// All pending completions, oldest first. Unreadable data reads as empty.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` only if the backing store itself fails.
    pub async fn read_all(&self) -> Result<Vec<PendingCompletion>, StorageError> {
        read_list(self.store.as_ref(), &self.key).await
    }

    /// Overwrite the queue with `pending`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be written.
    pub async fn replace(&self, pending: &[PendingCompletion]) -> Result<(), StorageError> {
        write_list(self.store.as_ref(), &self.key, pending).await
    }
}

async fn read_list<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Vec<T>, StorageError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<Vec<T>>(&raw) {
        Ok(items) => Ok(items),
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "discarding unreadable local queue");
            Ok(Vec::new())
        }
    }
}

async fn write_list<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    items: &[T],
) -> Result<(), StorageError> {
    let raw =
        serde_json::to_string(items).map_err(|e| StorageError::Serialization(e.to_string()))?;
    store.set(key, &raw).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use quant_core::model::{LessonId, LessonReward};
    use quant_core::time::fixed_clock;
    use serde_json::{Value, json};

    fn queue(repo: &InMemoryRepository) -> ProgressQueue {
        ProgressQueue::new(Arc::new(repo.clone())).with_clock(fixed_clock())
    }

    fn patch(value: Value) -> ProgressPatch {
        ProgressPatch::normalize(&value)
    }

    #[tokio::test]
    async fn empty_store_reads_empty() {
        let repo = InMemoryRepository::new();
        assert!(queue(&repo).read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enqueue_preserves_order_and_layout() {
        let repo = InMemoryRepository::new();
        let q = queue(&repo);

        q.enqueue(patch(json!({"math1_lesson1": true}))).await.unwrap();
        q.enqueue(patch(json!({"math1_lesson2": true}))).await.unwrap();

        let entries = q.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].patch().get("math1_lesson1"), Some(&json!(true)));
        assert_eq!(entries[1].patch().get("math1_lesson2"), Some(&json!(true)));

        let raw = repo.get(DEFAULT_QUEUE_KEY).await.unwrap().unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            stored,
            json!([
                {"t": 1_700_000_000_000_i64, "patch": {"math1_lesson1": true}},
                {"t": 1_700_000_000_000_i64, "patch": {"math1_lesson2": true}},
            ])
        );
    }

    #[tokio::test]
    async fn corrupt_value_reads_empty_and_heals_on_write() {
        let repo = InMemoryRepository::new();
        repo.set(DEFAULT_QUEUE_KEY, "{not json").await.unwrap();
        let q = queue(&repo);

        assert!(q.read_all().await.unwrap().is_empty());

        q.enqueue(patch(json!({"a": 1}))).await.unwrap();
        assert_eq!(q.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn wrong_shape_reads_empty() {
        let repo = InMemoryRepository::new();
        repo.set(DEFAULT_QUEUE_KEY, r#"{"t": 1}"#).await.unwrap();
        assert!(queue(&repo).read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_empties_queue() {
        let repo = InMemoryRepository::new();
        let q = queue(&repo);
        q.enqueue(patch(json!({"a": 1}))).await.unwrap();
        q.clear().await.unwrap();
        assert_eq!(q.len().await.unwrap(), 0);
        assert_eq!(repo.get(DEFAULT_QUEUE_KEY).await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn custom_keys_are_isolated() {
        let repo = InMemoryRepository::new();
        let a = ProgressQueue::with_key(Arc::new(repo.clone()), "queue_a");
        let b = ProgressQueue::with_key(Arc::new(repo.clone()), "queue_b");

        a.enqueue(patch(json!({"x": 1}))).await.unwrap();
        assert_eq!(a.len().await.unwrap(), 1);
        assert_eq!(b.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn completions_append_and_replace() {
        let repo = InMemoryRepository::new();
        let completions = CompletionQueue::new(Arc::new(repo.clone()));
        let first = PendingCompletion::new(
            LessonId::new("math1_lesson1").unwrap(),
            1,
            LessonReward::default(),
        );
        let second = PendingCompletion::new(
            LessonId::new("math1_lesson2").unwrap(),
            2,
            LessonReward::new(40).with_badge("Streak"),
        );

        completions.push(first.clone()).await.unwrap();
        completions.push(second.clone()).await.unwrap();
        assert_eq!(completions.read_all().await.unwrap(), vec![first, second.clone()]);

        completions.replace(&[second.clone()]).await.unwrap();
        assert_eq!(completions.read_all().await.unwrap(), vec![second]);
        assert!(repo.get(DEFAULT_QUEUE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_completions_read_empty() {
        let repo = InMemoryRepository::new();
        repo.set(DEFAULT_COMPLETION_QUEUE_KEY, "[{\"lesson\": 3}]").await.unwrap();
        let completions = CompletionQueue::new(Arc::new(repo));
        assert!(completions.read_all().await.unwrap().is_empty());
    }
}
