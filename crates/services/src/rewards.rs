//! Lesson rewards that survive being offline.
//!
//! A completion is applied to the user's document in one read-compute-write
//! that marks the lesson completed and updates XP, level and badges together.
//! When that cannot happen the completion is parked in the local
//! [`CompletionQueue`] and applied on the next flush. The already-completed
//! check runs every time, so a reward is granted at most once.

use std::sync::Arc;

use quant_core::model::{PendingCompletion, RewardUpdate, UserId, UserProfile, apply_reward};
use serde_json::json;
use storage::CompletionQueue;
use storage::repository::DocumentStore;
use tokio::sync::Mutex;

use crate::error::RewardError;

/// Result of applying one completion to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardApplied {
    Granted(RewardUpdate),
    AlreadyCompleted,
}

/// Applies lesson rewards and keeps the ones that could not be applied yet.
#[derive(Clone)]
pub struct RewardLedger {
    documents: Arc<dyn DocumentStore>,
    completions: CompletionQueue,
    // Held across every profile read-compute-write and completion queue write.
    lock: Arc<Mutex<()>>,
}

impl RewardLedger {
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>, completions: CompletionQueue) -> Self {
        Self {
            documents,
            completions,
            lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn completions(&self) -> &CompletionQueue {
        &self.completions
    }

    /// Apply `pending` to `user`'s document now.
    ///
    /// # Errors
    ///
    /// Returns `RewardError::Storage` if the document cannot be read or
    /// written, and `RewardError::MalformedProfile` if it has fields of the
    /// wrong type. Nothing is written in either case.
    pub async fn apply(
        &self,
        user: &UserId,
        pending: &PendingCompletion,
    ) -> Result<RewardApplied, RewardError> {
        let _guard = self.lock.lock().await;
        self.apply_locked(user, pending).await
    }

    /// Park `pending` until the next flush.
    pub async fn defer(&self, pending: PendingCompletion) {
        let _guard = self.lock.lock().await;
        let lesson = pending.lesson.clone();
        if let Err(err) = self.completions.push(pending).await {
            tracing::error!(
                key = %self.completions.key(),
                lesson = %lesson,
                error = %err,
                "failed to persist pending lesson completion"
            );
        }
    }

    /// Apply parked completions to `user`'s document, oldest first.
    ///
    /// Stops at the first one that fails and keeps it, with everything after
    /// it, for the next flush. Returns `true` if any reward was written.
    pub async fn flush(&self, user: &UserId) -> bool {
        let _guard = self.lock.lock().await;

        let pending = match self.completions.read_all().await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "failed to read pending completions");
                return false;
            }
        };
        if pending.is_empty() {
            return false;
        }

        let mut granted = 0_usize;
        let mut settled = 0_usize;
        for completion in &pending {
            match self.apply_locked(user, completion).await {
                Ok(RewardApplied::Granted(_)) => granted += 1,
                Ok(RewardApplied::AlreadyCompleted) => {}
                Err(err) => {
                    tracing::warn!(
                        user = %user,
                        lesson = %completion.lesson,
                        error = %err,
                        "pending completion not applied, keeping it"
                    );
                    break;
                }
            }
            settled += 1;
        }

        // A settled completion that stays queued is skipped as already completed.
        if let Err(err) = self.completions.replace(&pending[settled..]).await {
            tracing::warn!(user = %user, error = %err, "failed to trim pending completions");
        }
        if granted > 0 {
            tracing::info!(
                user = %user,
                granted,
                remaining = pending.len() - settled,
                "applied pending lesson rewards"
            );
        }
        granted > 0
    }

    async fn apply_locked(
        &self,
        user: &UserId,
        pending: &PendingCompletion,
    ) -> Result<RewardApplied, RewardError> {
        let document = self
            .documents
            .read_document(user)
            .await?
            .unwrap_or_default();
        let profile =
            UserProfile::from_document(&document).map_err(RewardError::MalformedProfile)?;
        if profile.lesson(&pending.lesson).completed {
            tracing::debug!(user = %user, lesson = %pending.lesson, "lesson already completed");
            return Ok(RewardApplied::AlreadyCompleted);
        }

        let update = apply_reward(&profile, &pending.reward);
        let mut partial = pending.progress_patch().into_document_update();
        partial.insert("xp".into(), json!(update.xp));
        partial.insert("level".into(), json!(update.level));
        partial.insert("badges".into(), json!(update.badges));
        self.documents.merge_write(user, partial).await?;

        Ok(RewardApplied::Granted(update))
    }
}
