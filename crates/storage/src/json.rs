// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Column-level JSON merges for `status_data` updates.
//!
//! Updates that only extend nested objects must not round-trip the whole
//! document, so callers describe them as a (path, patch) pair and the merge
//! happens in place, creating empty parents as needed.

use serde_json::{Map, Value};

/// Merge `patch` into the object at `path` inside `target`.
///
/// Missing parents are created as empty objects. A non-object value standing
/// where an object is expected is replaced. Scalar values in `patch`
/// overwrite; object values merge one level at a time.
pub fn json_merge(target: &mut Value, path: &[&str], patch: Value) {
    let mut cursor = target;
    for key in path {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let map = match cursor.as_object_mut() {
            Some(map) => map,
            None => return,
        };
        cursor = map.entry(key.to_string()).or_insert(Value::Null);
    }
    merge_value(cursor, patch);
}

fn merge_value(target: &mut Value, patch: Value) {
    match (target.as_object_mut(), patch) {
        (Some(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (_, patch) => *target = patch,
    }
}

#[cfg(test)]
#[path = "json_tests.rs"]
mod tests;
