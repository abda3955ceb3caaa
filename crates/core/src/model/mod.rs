mod gamify;
mod ids;
mod lesson;
pub mod merge;
mod patch;
mod profile;
mod queue;
mod user;

pub use gamify::{
    DEFAULT_LESSON_XP, LessonReward, RewardUpdate, XP_PER_LEVEL, apply_reward, level_for_xp,
};
pub use ids::{IdError, LessonId, UserId};
pub use lesson::{LessonRecord, PendingCompletion, completion_patch};
pub use merge::{deep_merge, deep_merge_into};
pub use patch::{PROGRESS_FIELD, ProgressPatch};
pub use profile::UserProfile;
pub use queue::{QueueEntry, consolidate};
pub use user::AuthUser;
