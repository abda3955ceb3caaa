use storage::{DEFAULT_COMPLETION_QUEUE_KEY, DEFAULT_QUEUE_KEY};

/// Local storage key caching the signed-in user's id.
pub const DEFAULT_CURRENT_USER_KEY: &str = "current_user";

/// Storage keys used by the sync services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub queue_key: String,
    pub completion_queue_key: String,
    pub current_user_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            completion_queue_key: DEFAULT_COMPLETION_QUEUE_KEY.to_string(),
            current_user_key: DEFAULT_CURRENT_USER_KEY.to_string(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `QUANT_QUEUE_KEY`, `QUANT_COMPLETION_QUEUE_KEY`
    /// and `QUANT_CURRENT_USER_KEY`. Blank values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_key: env_key("QUANT_QUEUE_KEY").unwrap_or(defaults.queue_key),
            completion_queue_key: env_key("QUANT_COMPLETION_QUEUE_KEY")
                .unwrap_or(defaults.completion_queue_key),
            current_user_key: env_key("QUANT_CURRENT_USER_KEY")
                .unwrap_or(defaults.current_user_key),
        }
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_persisted_layout() {
        let config = SyncConfig::default();
        assert_eq!(config.queue_key, "qq_progress_queue_v1");
        assert_eq!(config.completion_queue_key, "qq_completion_queue_v1");
        assert_eq!(config.current_user_key, "current_user");
    }
}
