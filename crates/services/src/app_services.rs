use std::sync::Arc;

use storage::{CompletionQueue, ProgressQueue};
use storage::repository::Storage;

use crate::Clock;
use crate::auth::AuthSession;
use crate::config::SyncConfig;
use crate::error::AppServicesError;
use crate::lesson_service::LessonService;
use crate::profile_service::ProfileService;
use crate::progress_sync::ProgressSync;

/// Assembles app-facing services over one set of stores.
#[derive(Clone)]
pub struct AppServices {
    auth: AuthSession,
    progress: ProgressSync,
    profiles: Arc<ProfileService>,
    lessons: Arc<LessonService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: &SyncConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, config))
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, config: &SyncConfig) -> Self {
        let auth = AuthSession::with_cache_key(
            Arc::clone(&storage.local),
            config.current_user_key.clone(),
        );
        let queue = ProgressQueue::with_key(Arc::clone(&storage.local), config.queue_key.clone())
            .with_clock(clock);
        let completions = CompletionQueue::with_key(
            Arc::clone(&storage.local),
            config.completion_queue_key.clone(),
        );
        let progress = ProgressSync::new(
            auth.clone(),
            Arc::clone(&storage.documents),
            queue,
            completions,
        );
        let profiles = Arc::new(ProfileService::new(
            clock,
            auth.clone(),
            Arc::clone(&storage.documents),
        ));
        let lessons = Arc::new(LessonService::new(clock, progress.clone()));

        Self {
            auth,
            progress,
            profiles,
            lessons,
        }
    }

    #[must_use]
    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressSync {
        &self.progress
    }

    #[must_use]
    pub fn profiles(&self) -> Arc<ProfileService> {
        Arc::clone(&self.profiles)
    }

    #[must_use]
    pub fn lessons(&self) -> Arc<LessonService> {
        Arc::clone(&self.lessons)
    }
}
