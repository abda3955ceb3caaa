use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};

use super::ids::LessonId;
use super::lesson::LessonRecord;
use super::user::AuthUser;

/// Typed read view over a user's remote document.
///
/// Every field is defaulted, so partially written documents (or documents
/// created by older clients) still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserProfile {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub xp: u64,
    #[serde(deserialize_with = "lenient_level")]
    pub level: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub streak: u32,
    pub badges: Vec<String>,
    pub achievements: Vec<Value>,
    pub progress: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: None,
            email: None,
            photo_url: None,
            xp: 0,
            level: 1,
            streak: 0,
            badges: Vec::new(),
            achievements: Vec::new(),
            progress: Map::new(),
            created_at: None,
        }
    }
}

impl UserProfile {
    /// Starting profile written the first time a user signs in.
    #[must_use]
    pub fn for_new_user(user: &AuthUser, created_at: DateTime<Utc>) -> Self {
        Self {
            name: Some(user.display_name.clone().unwrap_or_default()),
            email: Some(user.email.clone().unwrap_or_default()),
            photo_url: Some(user.photo_url.clone().unwrap_or_default()),
            created_at: Some(created_at.timestamp_millis()),
            ..Self::default()
        }
    }

    /// Read a profile out of a raw document.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if a present field has the wrong type.
    pub fn from_document(document: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(document.clone()))
    }

    /// The document form of this profile, suitable for a merge-write.
    #[must_use]
    pub fn to_document(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    #[must_use]
    pub fn lesson(&self, lesson: &LessonId) -> LessonRecord {
        LessonRecord::lookup(&self.progress, lesson)
    }

    #[must_use]
    pub fn completed_lessons(&self) -> usize {
        self.progress
            .values()
            .filter(|value| LessonRecord::from_value(value).completed)
            .count()
    }

    #[must_use]
    pub fn has_badge(&self, badge: &str) -> bool {
        self.badges.iter().any(|b| b == badge)
    }
}

// Documents written by JS clients may store counters as `20.0` or `null`.
fn whole_number<T, E>(value: Option<Value>) -> Result<Option<T>, E>
where
    T: TryFrom<u64>,
    E: de::Error,
{
    let number = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number,
        Some(other) => return Err(E::custom(format!("expected a number, got {other}"))),
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = number.as_u64().or_else(|| {
        number
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
            .map(|f| f as u64)
    });
    whole
        .and_then(|whole| T::try_from(whole).ok())
        .map(Some)
        .ok_or_else(|| E::custom(format!("expected a whole non-negative number, got {number}")))
}

fn lenient_count<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + Default,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(whole_number(value)?.unwrap_or_default())
}

fn lenient_level<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(whole_number(value)?.unwrap_or(1))
}
