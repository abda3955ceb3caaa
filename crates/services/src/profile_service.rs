use std::sync::Arc;

use quant_core::Clock;
use quant_core::model::{AuthUser, UserProfile};
use storage::repository::DocumentStore;

use crate::auth::AuthSession;
use crate::error::ProfileServiceError;

/// Reads and bootstraps user profile documents.
#[derive(Clone)]
pub struct ProfileService {
    clock: Clock,
    auth: AuthSession,
    documents: Arc<dyn DocumentStore>,
}

impl ProfileService {
    #[must_use]
    pub fn new(clock: Clock, auth: AuthSession, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            clock,
            auth,
            documents,
        }
    }

    /// Create the starting document for `user` unless one already exists.
    ///
    /// Returns `true` if a document was created. Failures are logged and
    /// reported as `false`; they never block sign-in.
    pub async fn ensure_user_document(&self, user: &AuthUser) -> bool {
        match self.documents.read_document(&user.uid).await {
            Ok(Some(_)) => false,
            Ok(None) => {
                let document = UserProfile::for_new_user(user, self.clock.now()).to_document();
                match self.documents.merge_write(&user.uid, document).await {
                    Ok(()) => {
                        tracing::info!(user = %user.uid, "created user document");
                        true
                    }
                    Err(err) => {
                        tracing::warn!(user = %user.uid, error = %err, "failed to create user document");
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(user = %user.uid, error = %err, "failed to check user document");
                false
            }
        }
    }

    /// Profile of the signed-in user, or `None` if signed out or never stored.
    ///
    /// # Errors
    ///
    /// Returns `ProfileServiceError` if the document cannot be read or has
    /// fields of the wrong type.
    pub async fn load_profile(&self) -> Result<Option<UserProfile>, ProfileServiceError> {
        let Some(uid) = self.auth.current_uid() else {
            return Ok(None);
        };
        let Some(document) = self.documents.read_document(&uid).await? else {
            return Ok(None);
        };
        UserProfile::from_document(&document)
            .map(Some)
            .map_err(ProfileServiceError::MalformedProfile)
    }
}
