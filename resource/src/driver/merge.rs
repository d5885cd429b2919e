// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Merging of partial records into stored ones.

use restforge_core::driver::{DriverError, DriverResult};
use restforge_core::model::{MANAGED_FIELDS, Model, OPTIONAL_FIELDS, is_zero};
use serde_json::{Map, Value};

/// Assigns the non-zero leaves of `patch` onto `target`, recursing into nested objects.
fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch.iter().filter(|(_, v)| !is_zero(v)) {
                merge_value(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Returns `existing` with the fields set in `patch` applied on top.
///
/// Only fields with non-zero values in `patch` are applied, so fields cannot be cleared this
/// way.  The optional base fields are the exception: any non-null value is applied, including
/// zero.  Fields managed by the storage layer and relation fields are never applied.
pub fn merge<M: Model>(existing: &M, patch: &Value) -> DriverResult<M> {
    let patch = match patch {
        Value::Object(patch) => patch,
        _ => return Err(DriverError::InvalidInput("Partial record must be an object".to_owned())),
    };

    let relations = M::relations();
    let mut doc =
        serde_json::to_value(existing).map_err(|e| DriverError::BackendError(e.to_string()))?;
    if !doc.is_object() {
        doc = Value::Object(Map::default());
    }
    if let Value::Object(fields) = &mut doc {
        for (key, value) in patch {
            if MANAGED_FIELDS.contains(&key.as_str()) || relations.iter().any(|r| r.name == key) {
                continue;
            }
            if OPTIONAL_FIELDS.contains(&key.as_str()) {
                if !value.is_null() {
                    fields.insert(key.clone(), value.clone());
                }
                continue;
            }
            if is_zero(value) {
                continue;
            }
            merge_value(fields.entry(key.clone()).or_insert(Value::Null), value);
        }
    }
    serde_json::from_value(doc).map_err(|e| DriverError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use restforge_core::model::Base;
    use restforge_core::model::testutils::{Note, Tag};
    use serde_json::json;
    use time::macros::datetime;

    fn stored() -> Note {
        Note {
            base: Base {
                id: "n1".to_owned(),
                created_at: Some(datetime!(2023-06-01 10:00:00 UTC)),
                updated_at: Some(datetime!(2023-06-01 11:00:00 UTC)),
                created_by: "alice".to_owned(),
                updated_by: "bob".to_owned(),
                remark: Some("old remark".to_owned()),
                order: None,
            },
            title: "title".to_owned(),
            body: "body".to_owned(),
            priority: 3,
            done: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_non_zero_fields() {
        let merged = merge(&stored(), &json!({"body": "new body", "order": 7})).unwrap();
        let mut exp = stored();
        exp.body = "new body".to_owned();
        exp.base.order = Some(7);
        assert_eq!(exp, merged);
    }

    #[test]
    fn test_merge_ignores_zero_values() {
        let merged =
            merge(&stored(), &json!({"title": "", "priority": 0, "done": false, "remark": null}))
                .unwrap();
        assert_eq!(stored(), merged);
    }

    #[test]
    fn test_merge_applies_zero_optional_fields() {
        let merged = merge(&stored(), &json!({"order": 0, "remark": ""})).unwrap();
        let mut exp = stored();
        exp.base.order = Some(0);
        exp.base.remark = Some("".to_owned());
        assert_eq!(exp, merged);
    }

    #[test]
    fn test_merge_ignores_managed_fields_and_relations() {
        let merged = merge(
            &stored(),
            &json!({
                "id": "other",
                "created_at": "2020-01-01T00:00:00.000000Z",
                "created_by": "mallory",
                "updated_by": "mallory",
                "tag": {"name": "injected"},
                "remark": "new remark",
            }),
        )
        .unwrap();
        let mut exp = stored();
        exp.base.remark = Some("new remark".to_owned());
        assert_eq!(exp, merged);
    }

    #[test]
    fn test_merge_nested_objects() {
        let tag =
            Tag { name: "parent".to_owned(), parent_id: "p0".to_owned(), ..Default::default() };
        let merged = merge(&tag, &json!({"name": "renamed"})).unwrap();
        assert_eq!("renamed", merged.name);
        assert_eq!("p0", merged.parent_id);

        let mut target = json!({"a": {"b": 1, "c": 2}});
        merge_value(&mut target, &json!({"a": {"c": 3, "d": 0, "e": "x"}}));
        assert_eq!(json!({"a": {"b": 1, "c": 3, "e": "x"}}), target);
    }

    #[test]
    fn test_merge_errors() {
        assert_eq!(
            DriverError::InvalidInput("Partial record must be an object".to_owned()),
            merge(&stored(), &json!(["x"])).unwrap_err()
        );
        match merge(&stored(), &json!({"priority": "high"})).unwrap_err() {
            DriverError::InvalidInput(msg) => assert!(msg.contains("invalid type")),
            e => panic!("Unexpected error {:?}", e),
        }
    }
}
