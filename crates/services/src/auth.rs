use std::sync::Arc;

use quant_core::model::{AuthUser, UserId};
use storage::repository::KeyValueStore;
use tokio::sync::watch;

use crate::config::DEFAULT_CURRENT_USER_KEY;

/// Current sign-in state, broadcast to subscribers on every change.
///
/// The auth provider drives it through `sign_in` / `sign_out`; everything
/// else only reads it. The signed-in uid is also cached in local storage
/// under `current_user`.
#[derive(Clone)]
pub struct AuthSession {
    state: Arc<watch::Sender<Option<AuthUser>>>,
    cache: Arc<dyn KeyValueStore>,
    cache_key: String,
}

impl AuthSession {
    #[must_use]
    pub fn new(cache: Arc<dyn KeyValueStore>) -> Self {
        Self::with_cache_key(cache, DEFAULT_CURRENT_USER_KEY)
    }

    #[must_use]
    pub fn with_cache_key(cache: Arc<dyn KeyValueStore>, cache_key: impl Into<String>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
            cache,
            cache_key: cache_key.into(),
        }
    }

    #[must_use]
    pub fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn current_uid(&self) -> Option<UserId> {
        self.state.borrow().as_ref().map(|user| user.uid.clone())
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Receiver yielding the state now and after every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }

    /// Mark `user` as signed in and notify subscribers.
    pub async fn sign_in(&self, user: AuthUser) {
        let uid = user.uid.clone();
        self.state.send_replace(Some(user));
        if let Err(err) = self.cache.set(&self.cache_key, uid.as_str()).await {
            tracing::warn!(user = %uid, error = %err, "failed to cache signed-in user");
        }
        tracing::info!(user = %uid, "signed in");
    }

    /// Clear the session and notify subscribers.
    pub async fn sign_out(&self) {
        let previous = self.state.send_replace(None);
        if let Err(err) = self.cache.remove(&self.cache_key).await {
            tracing::warn!(error = %err, "failed to clear cached user");
        }
        if let Some(user) = previous {
            tracing::info!(user = %user.uid, "signed out");
        }
    }

    /// The uid cached by the last sign-in on this device, if any.
    ///
    /// This is a hint for display only; it does not authenticate anyone.
    pub async fn cached_uid(&self) -> Option<UserId> {
        match self.cache.get(&self.cache_key).await {
            Ok(raw) => raw.and_then(|raw| UserId::new(raw).ok()),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read cached user");
                None
            }
        }
    }
}
