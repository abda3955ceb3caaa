//! Recursive merge of JSON mappings.
//!
//! Nested objects are merged key by key; every other value (scalars, `null`,
//! arrays) replaces what was there. This is the same rule the remote document
//! store applies on a merge-write, so folding patches locally and writing once
//! yields the same document as writing each patch in turn.

use serde_json::{Map, Value};

/// Merge `source` into `target` in place.
pub fn deep_merge_into(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, incoming) in source {
        match incoming {
            Value::Object(nested) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(existing) = slot {
                    deep_merge_into(existing, nested);
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

/// Returns a new mapping with `source` merged over `target`.
#[must_use]
pub fn deep_merge(target: &Map<String, Value>, source: &Map<String, Value>) -> Map<String, Value> {
    let mut out = target.clone();
    deep_merge_into(&mut out, source);
    out
}
