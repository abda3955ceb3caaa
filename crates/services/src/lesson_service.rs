use quant_core::Clock;
use quant_core::model::{LessonId, LessonReward, PendingCompletion};

use crate::error::{LessonServiceError, RewardError};
use crate::progress_sync::{ProgressSync, SaveOutcome};
use crate::rewards::RewardApplied;

/// What happened when a lesson was marked complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LessonCompletion {
    /// Progress and rewards were written to the user's document.
    Completed {
        xp: u64,
        level: u32,
        new_badge: Option<String>,
    },
    /// The lesson was already completed; nothing was written.
    AlreadyCompleted,
    /// The completion and its reward were queued locally and will be applied
    /// on the next flush.
    Deferred(SaveOutcome),
}

/// Marks lessons complete and applies XP, level and badge rewards.
#[derive(Clone)]
pub struct LessonService {
    clock: Clock,
    sync: ProgressSync,
}

impl LessonService {
    #[must_use]
    pub fn new(clock: Clock, sync: ProgressSync) -> Self {
        Self { clock, sync }
    }

    /// Record `lesson` as completed, unlock its successor and grant `reward`.
    ///
    /// Signed out, or when the user's document cannot be reached, the
    /// completion is queued with its reward and applied on the next flush. A
    /// lesson that is already completed is never rewarded twice.
    ///
    /// # Errors
    ///
    /// Returns `LessonServiceError::MalformedProfile` if the stored document
    /// has fields of the wrong type.
    pub async fn complete_lesson(
        &self,
        lesson: &LessonId,
        reward: &LessonReward,
    ) -> Result<LessonCompletion, LessonServiceError> {
        let pending =
            PendingCompletion::new(lesson.clone(), self.clock.now_millis(), reward.clone());
        let rewards = self.sync.rewards();

        let Some(uid) = self.sync.auth().current_uid() else {
            rewards.defer(pending).await;
            tracing::debug!(lesson = %lesson, "signed out, lesson completion queued");
            return Ok(LessonCompletion::Deferred(SaveOutcome::queued()));
        };

        match rewards.apply(&uid, &pending).await {
            Ok(RewardApplied::Granted(update)) => {
                tracing::info!(user = %uid, lesson = %lesson, xp = update.xp, level = update.level, "lesson completed");
                Ok(LessonCompletion::Completed {
                    xp: update.xp,
                    level: update.level,
                    new_badge: update.new_badge,
                })
            }
            Ok(RewardApplied::AlreadyCompleted) => Ok(LessonCompletion::AlreadyCompleted),
            Err(RewardError::MalformedProfile(err)) => {
                Err(LessonServiceError::MalformedProfile(err))
            }
            Err(err) => {
                tracing::warn!(user = %uid, lesson = %lesson, error = %err, "completion write failed, queueing");
                rewards.defer(pending).await;
                Ok(LessonCompletion::Deferred(SaveOutcome::fallback(err.to_string())))
            }
        }
    }
}
