//! Offline-first progress writes.
//!
//! `ProgressSync` sends progress patches straight to the user's remote
//! document while someone is signed in, and parks them in the local
//! [`ProgressQueue`] otherwise (or when the remote write fails). Queued
//! patches are folded into one patch and written on the next flush, which
//! runs automatically whenever a user signs in. The same flush applies any
//! lesson rewards parked in the [`RewardLedger`].

use std::sync::Arc;

use quant_core::model::{AuthUser, PROGRESS_FIELD, ProgressPatch, UserId, consolidate};
use serde::Serialize;
use serde_json::{Map, Value};
use storage::repository::DocumentStore;
use storage::{CompletionQueue, ProgressQueue};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::auth::AuthSession;
use crate::rewards::RewardLedger;

/// Result of a save: never an error, the patch is either written or queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub ok: bool,
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveOutcome {
    /// Written to the remote document, or nothing to write.
    #[must_use]
    pub fn written() -> Self {
        Self {
            ok: true,
            queued: false,
            error: None,
        }
    }

    /// Accepted into the local queue while signed out.
    #[must_use]
    pub fn queued() -> Self {
        Self {
            ok: true,
            queued: true,
            error: None,
        }
    }

    /// Remote write failed; the patch was queued instead.
    #[must_use]
    pub fn fallback(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            queued: true,
            error: Some(error.into()),
        }
    }
}

/// Coordinates progress writes between the local queue and the remote store.
#[derive(Clone)]
pub struct ProgressSync {
    auth: AuthSession,
    documents: Arc<dyn DocumentStore>,
    queue: ProgressQueue,
    // Serializes every queue mutation: enqueue and flush-then-clear.
    queue_lock: Arc<Mutex<()>>,
    rewards: RewardLedger,
}

impl ProgressSync {
    #[must_use]
    pub fn new(
        auth: AuthSession,
        documents: Arc<dyn DocumentStore>,
        queue: ProgressQueue,
        completions: CompletionQueue,
    ) -> Self {
        let rewards = RewardLedger::new(Arc::clone(&documents), completions);
        Self {
            auth,
            documents,
            queue,
            queue_lock: Arc::new(Mutex::new(())),
            rewards,
        }
    }

    #[must_use]
    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    #[must_use]
    pub fn queue(&self) -> &ProgressQueue {
        &self.queue
    }

    #[must_use]
    pub fn rewards(&self) -> &RewardLedger {
        &self.rewards
    }

    /// Save a caller-supplied update (`{"progress": {..}}` or a bare mapping).
    pub async fn save_progress(&self, update: &Value) -> SaveOutcome {
        self.save_patch(ProgressPatch::normalize(update)).await
    }

    /// Save an already normalized patch.
    pub async fn save_patch(&self, patch: ProgressPatch) -> SaveOutcome {
        if patch.is_empty() {
            return SaveOutcome::written();
        }

        let Some(uid) = self.auth.current_uid() else {
            self.enqueue(patch).await;
            return SaveOutcome::queued();
        };

        match self
            .documents
            .merge_write(&uid, patch.clone().into_document_update())
            .await
        {
            Ok(()) => {
                tracing::debug!(user = %uid, fields = patch.len(), "progress written");
                SaveOutcome::written()
            }
            Err(err) => {
                tracing::warn!(user = %uid, error = %err, "progress write failed, queueing");
                self.enqueue(patch).await;
                SaveOutcome::fallback(err.to_string())
            }
        }
    }

    /// The signed-in user's `progress` mapping; empty when signed out, when
    /// nothing is stored yet, or when the read fails.
    pub async fn load_progress(&self) -> Map<String, Value> {
        let Some(uid) = self.auth.current_uid() else {
            return Map::new();
        };

        match self.documents.read_document(&uid).await {
            Ok(Some(mut document)) => match document.remove(PROGRESS_FIELD) {
                Some(Value::Object(progress)) => progress,
                _ => Map::new(),
            },
            Ok(None) => Map::new(),
            Err(err) => {
                tracing::warn!(user = %uid, error = %err, "failed to load progress");
                Map::new()
            }
        }
    }

    /// Apply parked lesson rewards, then write every queued patch to the
    /// signed-in user's document in one merge-write and clear the queue.
    ///
    /// Returns `true` only if queued progress or rewards were written. On
    /// failure the queues are left as they were, so calling again later is
    /// safe.
    pub async fn flush_queued_progress(&self) -> bool {
        let Some(uid) = self.auth.current_uid() else {
            return false;
        };

        let rewarded = self.rewards.flush(&uid).await;
        let flushed = self.flush_patches(&uid).await;
        rewarded || flushed
    }

    async fn flush_patches(&self, uid: &UserId) -> bool {
        let _guard = self.queue_lock.lock().await;

        let entries = match self.queue.read_all().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(user = %uid, error = %err, "failed to read progress queue");
                return false;
            }
        };
        if entries.is_empty() {
            return false;
        }

        let merged = consolidate(&entries);
        if !merged.is_empty() {
            if let Err(err) = self
                .documents
                .merge_write(uid, merged.into_document_update())
                .await
            {
                tracing::warn!(
                    user = %uid,
                    entries = entries.len(),
                    error = %err,
                    "flush failed, keeping queue"
                );
                return false;
            }
        }

        if let Err(err) = self.queue.clear().await {
            // Already written remotely; re-flushing the same entries is harmless.
            tracing::warn!(user = %uid, error = %err, "flushed progress but failed to clear queue");
        }
        tracing::info!(user = %uid, entries = entries.len(), "flushed queued progress");
        true
    }

    /// Call `callback` with the current auth state and again after every
    /// transition.
    ///
    /// On a signed-in state the queue is flushed before the callback runs, so
    /// anything the callback reads already includes offline progress. The
    /// subscription lasts until the returned handle is unsubscribed or dropped.
    #[must_use = "dropping the subscription stops delivery"]
    pub fn on_user_ready<F>(&self, mut callback: F) -> UserReadySubscription
    where
        F: FnMut(Option<AuthUser>) + Send + 'static,
    {
        let mut states = self.auth.subscribe();
        let sync = self.clone();

        let task = tokio::spawn(async move {
            loop {
                let state = states.borrow_and_update().clone();
                match state {
                    Some(user) => {
                        sync.flush_queued_progress().await;
                        callback(Some(user));
                    }
                    None => callback(None),
                }
                if states.changed().await.is_err() {
                    break;
                }
            }
        });

        UserReadySubscription { task }
    }

    async fn enqueue(&self, patch: ProgressPatch) {
        let _guard = self.queue_lock.lock().await;
        if let Err(err) = self.queue.enqueue(patch).await {
            tracing::error!(key = %self.queue.key(), error = %err, "failed to persist queued progress");
        }
    }
}

/// Handle returned by [`ProgressSync::on_user_ready`].
#[derive(Debug)]
pub struct UserReadySubscription {
    task: JoinHandle<()>,
}

impl UserReadySubscription {
    /// Stop delivering auth transitions.
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for UserReadySubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
