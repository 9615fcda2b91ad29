// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn merges_into_nested_path_creating_parents() {
    let mut data = Value::Null;
    json_merge(
        &mut data,
        &["scheduler"],
        json!({"retries": 1, "last_try": "2026-01-01T00:00:00+00:00"}),
    );
    assert_eq!(data["scheduler"]["retries"], 1);
}

#[test]
fn preserves_sibling_keys() {
    let mut data = json!({"scheduler": {"retries": 3, "failed_predicates": []}});
    json_merge(&mut data, &["scheduler"], json!({"retries": 4}));
    assert_eq!(data["scheduler"]["retries"], 4);
    assert_eq!(data["scheduler"]["failed_predicates"], json!([]));
}

#[test]
fn scalar_patch_overwrites() {
    let mut data = json!({"error": {"src": "agent"}});
    json_merge(&mut data, &[], json!({"error": {"name": "TimeoutError"}}));
    assert_eq!(data["error"]["src"], "agent");
    assert_eq!(data["error"]["name"], "TimeoutError");
}

#[test]
fn non_object_intermediate_is_replaced() {
    let mut data = json!({"scheduler": 42});
    json_merge(&mut data, &["scheduler", "inner"], json!({"x": 1}));
    assert_eq!(data["scheduler"]["inner"]["x"], 1);
}
