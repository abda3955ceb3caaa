use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::merge::deep_merge_into;

/// Document field that holds the per-lesson progress tree.
pub const PROGRESS_FIELD: &str = "progress";

/// Incremental update to a user's progress tree.
///
/// Keys are lesson ids (or dotted field paths, expanded on construction);
/// values are arbitrary JSON. A patch never contains the `progress` wrapper
/// itself: it is always the inner mapping that gets merged under that field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressPatch(Map<String, Value>);

impl ProgressPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonicalize a caller-supplied update.
    ///
    /// Accepts `{ "progress": { .. } }` or a bare mapping. Anything that is not
    /// a JSON object yields an empty patch. A `progress` key whose value is not
    /// an object is dropped and the remaining fields are used.
    #[must_use]
    pub fn normalize(input: &Value) -> Self {
        let Value::Object(fields) = input else {
            return Self::default();
        };

        match fields.get(PROGRESS_FIELD) {
            Some(Value::Object(inner)) => Self::from_fields(inner.clone()),
            Some(_) => {
                let mut rest = fields.clone();
                rest.remove(PROGRESS_FIELD);
                Self::from_fields(rest)
            }
            None => Self::from_fields(fields.clone()),
        }
    }

    /// Build a patch from raw fields, expanding dotted keys into nested objects.
    #[must_use]
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        let mut patch = Self::default();
        for (key, value) in fields {
            patch.insert(&key, value);
        }
        patch
    }

    /// Set `key` to `value`, merging into whatever the patch already holds.
    ///
    /// `"math1_lesson2.unlocked"` addresses the `unlocked` field inside the
    /// `math1_lesson2` record. Keys with empty path segments are kept literal.
    pub fn insert(&mut self, key: &str, value: Value) {
        let segments: Vec<&str> = key.split('.').collect();
        if segments.len() == 1 || segments.iter().any(|s| s.is_empty()) {
            let mut single = Map::new();
            single.insert(key.to_owned(), value);
            deep_merge_into(&mut self.0, &single);
            return;
        }

        let mut nested = value;
        for segment in segments.iter().rev() {
            let mut wrapper = Map::new();
            wrapper.insert((*segment).to_owned(), nested);
            nested = Value::Object(wrapper);
        }
        if let Value::Object(path) = nested {
            deep_merge_into(&mut self.0, &path);
        }
    }

    /// Fold `later` over this patch: its scalars win, nested records accumulate.
    pub fn merge(&mut self, later: &ProgressPatch) {
        deep_merge_into(&mut self.0, &later.0);
    }

    /// Fold patches in order into one consolidated patch.
    #[must_use]
    pub fn coalesce<'a>(patches: impl IntoIterator<Item = &'a ProgressPatch>) -> Self {
        let mut merged = Self::default();
        for patch in patches {
            merged.merge(patch);
        }
        merged
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// The partial document to merge-write: `{ "progress": <patch> }`.
    #[must_use]
    pub fn into_document_update(self) -> Map<String, Value> {
        let mut update = Map::new();
        update.insert(PROGRESS_FIELD.to_owned(), Value::Object(self.0));
        update
    }
}

impl From<Map<String, Value>> for ProgressPatch {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_fields(fields)
    }
}
