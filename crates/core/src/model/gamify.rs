//! XP, level and badge rules applied when a lesson is completed.

use serde::{Deserialize, Serialize};

use super::profile::UserProfile;

/// XP granted for a lesson when the caller does not specify a reward.
pub const DEFAULT_LESSON_XP: u64 = 20;

/// XP needed per level: level `n` is left once total XP reaches `n * 100`.
pub const XP_PER_LEVEL: u64 = 100;

/// What completing a lesson is worth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonReward {
    pub xp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
}

impl Default for LessonReward {
    fn default() -> Self {
        Self {
            xp: DEFAULT_LESSON_XP,
            badge: None,
        }
    }
}

impl LessonReward {
    #[must_use]
    pub fn new(xp: u64) -> Self {
        Self { xp, badge: None }
    }

    #[must_use]
    pub fn with_badge(mut self, badge: impl Into<String>) -> Self {
        self.badge = Some(badge.into());
        self
    }
}

/// Level reached with `xp` total, never lower than `current`.
#[must_use]
pub fn level_for_xp(xp: u64, current: u32) -> u32 {
    let earned = u32::try_from(xp / XP_PER_LEVEL)
        .unwrap_or(u32::MAX)
        .saturating_add(1);
    earned.max(current).max(1)
}

/// Scalar profile fields after a reward is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardUpdate {
    pub xp: u64,
    pub level: u32,
    pub badges: Vec<String>,
    /// Set when the reward's badge was not already held.
    pub new_badge: Option<String>,
}

/// Apply `reward` on top of `profile`.
#[must_use]
pub fn apply_reward(profile: &UserProfile, reward: &LessonReward) -> RewardUpdate {
    let xp = profile.xp.saturating_add(reward.xp);
    let level = level_for_xp(xp, profile.level);

    let mut badges = profile.badges.clone();
    let new_badge = match &reward.badge {
        Some(badge) if !profile.has_badge(badge) => {
            badges.push(badge.clone());
            Some(badge.clone())
        }
        _ => None,
    };

    RewardUpdate {
        xp,
        level,
        badges,
        new_badge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_rises_each_hundred_xp() {
        assert_eq!(level_for_xp(0, 1), 1);
        assert_eq!(level_for_xp(99, 1), 1);
        assert_eq!(level_for_xp(100, 1), 2);
        assert_eq!(level_for_xp(250, 1), 3);
    }

    #[test]
    fn level_never_drops() {
        assert_eq!(level_for_xp(10, 4), 4);
        assert_eq!(level_for_xp(0, 0), 1);
    }

    #[test]
    fn reward_adds_xp_and_badge_once() {
        let mut profile = UserProfile {
            xp: 90,
            ..UserProfile::default()
        };
        let reward = LessonReward::new(50).with_badge("Vector Master");

        let update = apply_reward(&profile, &reward);
        assert_eq!(update.xp, 140);
        assert_eq!(update.level, 2);
        assert_eq!(update.new_badge.as_deref(), Some("Vector Master"));
        assert_eq!(update.badges, vec!["Vector Master".to_string()]);

        profile.badges = update.badges;
        let again = apply_reward(&profile, &reward);
        assert!(again.new_badge.is_none());
        assert_eq!(again.badges.len(), 1);
    }

    #[test]
    fn default_reward_is_twenty_xp() {
        let update = apply_reward(&UserProfile::default(), &LessonReward::default());
        assert_eq!(update.xp, DEFAULT_LESSON_XP);
        assert_eq!(update.level, 1);
    }
}
