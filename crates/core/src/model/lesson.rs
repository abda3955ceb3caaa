use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::gamify::LessonReward;
use super::ids::LessonId;
use super::patch::ProgressPatch;

/// Typed view of one lesson's entry in the progress tree.
///
/// Stored records look like `{"completed": true, "completedAt": 1700000000000}`
/// and may carry extra fields, which are ignored here. A bare boolean is read
/// as the completion flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LessonRecord {
    pub completed: bool,
    pub completed_at: Option<i64>,
    pub unlocked: bool,
}

impl LessonRecord {
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(completed) => Self {
                completed: *completed,
                ..Self::default()
            },
            Value::Object(fields) => Self {
                completed: flag(fields, "completed"),
                completed_at: fields.get("completedAt").and_then(Value::as_i64),
                unlocked: flag(fields, "unlocked"),
            },
            _ => Self::default(),
        }
    }

    /// Look a lesson up in a document's `progress` mapping.
    #[must_use]
    pub fn lookup(progress: &Map<String, Value>, lesson: &LessonId) -> Self {
        progress
            .get(lesson.as_str())
            .map(Self::from_value)
            .unwrap_or_default()
    }
}

fn flag(fields: &Map<String, Value>, name: &str) -> bool {
    fields.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Progress patch recording `lesson` as completed at `completed_at` (epoch
/// ms) and unlocking its successor, if the id names one.
#[must_use]
pub fn completion_patch(lesson: &LessonId, completed_at: i64) -> ProgressPatch {
    let mut patch = ProgressPatch::new();
    patch.insert(
        lesson.as_str(),
        json!({"completed": true, "completedAt": completed_at}),
    );
    if let Some(next) = lesson.next() {
        patch.insert(next.as_str(), json!({"unlocked": true}));
    }
    patch
}

/// A lesson completion whose reward has not reached the user's document yet.
///
/// Held in the local completion queue until it can be applied, at which
/// point the usual already-completed check decides whether XP is granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCompletion {
    pub lesson: LessonId,
    pub completed_at: i64,
    pub reward: LessonReward,
}

impl PendingCompletion {
    #[must_use]
    pub fn new(lesson: LessonId, completed_at: i64, reward: LessonReward) -> Self {
        Self {
            lesson,
            completed_at,
            reward,
        }
    }

    #[must_use]
    pub fn progress_patch(&self) -> ProgressPatch {
        completion_patch(&self.lesson, self.completed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_clock;

    #[test]
    fn reads_object_and_bool_forms() {
        let record = LessonRecord::from_value(&json!({"completed": true, "completedAt": 7, "score": 3}));
        assert_eq!(
            record,
            LessonRecord {
                completed: true,
                completed_at: Some(7),
                unlocked: false
            }
        );
        assert!(LessonRecord::from_value(&json!(true)).completed);
        assert_eq!(LessonRecord::from_value(&json!("?")), LessonRecord::default());
    }

    #[test]
    fn completion_patch_unlocks_successor() {
        let lesson = LessonId::new("math1_lesson1").unwrap();
        let patch = completion_patch(&lesson, fixed_clock().now_millis());
        assert_eq!(
            Value::Object(patch.into_fields()),
            json!({
                "math1_lesson1": {"completed": true, "completedAt": 1_700_000_000_000_i64},
                "math1_lesson2": {"unlocked": true},
            })
        );
    }

    #[test]
    fn completion_patch_without_successor() {
        let lesson = LessonId::new("welcome").unwrap();
        let patch = completion_patch(&lesson, fixed_clock().now_millis());
        assert_eq!(patch.len(), 1);
    }

    #[test]
    fn pending_completion_keeps_queue_layout() {
        let pending = PendingCompletion::new(
            LessonId::new("math1_lesson3").unwrap(),
            42,
            LessonReward::new(50).with_badge("Vector Master"),
        );
        let encoded = serde_json::to_value(&pending).unwrap();
        assert_eq!(
            encoded,
            json!({
                "lesson": "math1_lesson3",
                "completedAt": 42,
                "reward": {"xp": 50, "badge": "Vector Master"},
            })
        );
        let decoded: PendingCompletion = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, pending);
        assert_eq!(
            Value::Object(decoded.progress_patch().into_fields()),
            json!({
                "math1_lesson3": {"completed": true, "completedAt": 42},
                "math1_lesson4": {"unlocked": true},
            })
        );
    }
}
