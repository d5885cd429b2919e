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

//! Sanitization of audited payloads.

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Fields that never make it into the audit trail.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "token",
    "key",
    "private_key",
    "access_token",
    "refresh_token",
    "api_key",
    "auth_token",
    "session_id",
    "credit_card",
    "ssn",
    "social_security_number",
    "phone",
    "email",
];

/// Fields to look for, in order, when naming a record.
const NAME_FIELDS: &[&str] = &["name", "title", "username", "email", "code", "key", "id"];

/// Removes sensitive fields from JSON payloads.
#[derive(Clone, Debug, Default)]
pub struct FieldFilter {
    /// Lowercase names of the fields to drop at any depth.
    excludes: HashSet<String>,

    /// Lowercase names of the only top-level fields to keep.  Empty keeps all.
    includes: HashSet<String>,
}

impl FieldFilter {
    /// Creates a filter that drops the default sensitive fields plus `excludes` and, if
    /// `includes` is not empty, keeps only those top-level fields.
    pub fn new(excludes: &[String], includes: &[String]) -> Self {
        let excludes = DEFAULT_SENSITIVE_FIELDS
            .iter()
            .map(|f| (*f).to_owned())
            .chain(excludes.iter().map(|f| f.to_lowercase()))
            .collect();
        let includes = includes.iter().map(|f| f.to_lowercase()).collect();
        Self { excludes, includes }
    }

    /// Drops excluded fields from every object nested in `value`.
    fn scrub(&self, value: &Value) -> Value {
        match value {
            Value::Object(object) => Value::Object(
                object
                    .iter()
                    .filter(|(k, _)| !self.excludes.contains(&k.to_lowercase()))
                    .map(|(k, v)| (k.clone(), self.scrub(v)))
                    .collect::<Map<String, Value>>(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.scrub(v)).collect()),
            other => other.clone(),
        }
    }

    /// Returns a copy of `value` without sensitive fields.
    pub fn filter(&self, value: &Value) -> Value {
        let mut value = self.scrub(value);
        if !self.includes.is_empty() {
            let keep = |object: &mut Map<String, Value>| {
                object.retain(|k, _| self.includes.contains(&k.to_lowercase()))
            };
            match &mut value {
                Value::Object(object) => keep(object),
                Value::Array(items) => {
                    for item in items {
                        if let Value::Object(object) = item {
                            keep(object);
                        }
                    }
                }
                _ => (),
            }
        }
        value
    }
}

/// Cuts `s` down to `max` characters, marking the cut with a trailing `...`.  A `max` of zero
/// disables truncation.
pub fn truncate(s: String, max: usize) -> String {
    if max == 0 {
        return s;
    }
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s,
    }
}

/// Finds a human-readable name for `record` among its well-known fields.
pub fn record_name(record: &Value) -> String {
    for field in NAME_FIELDS {
        match record.get(field) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(Value::Number(n)) => return n.to_string(),
            _ => (),
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_defaults() {
        let filter = FieldFilter::new(&[], &[]);
        let value = json!({
            "username": "alice",
            "Password": "x",
            "profile": {"email": "a@example.com", "city": "Barcelona"},
            "devices": [{"token": "t", "model": "phone"}],
        });
        assert_eq!(
            json!({
                "username": "alice",
                "profile": {"city": "Barcelona"},
                "devices": [{"model": "phone"}],
            }),
            filter.filter(&value)
        );
    }

    #[test]
    fn test_filter_custom_excludes_and_includes() {
        let filter = FieldFilter::new(&["Nickname".to_owned()], &[]);
        assert_eq!(json!({"a": 1}), filter.filter(&json!({"a": 1, "nickname": "x"})));

        let filter = FieldFilter::new(&[], &["id".to_owned(), "name".to_owned()]);
        assert_eq!(
            json!([{"id": "1", "name": "n"}]),
            filter.filter(&json!([{"id": "1", "name": "n", "other": true, "password": "x"}]))
        );
    }

    #[test]
    fn test_filter_is_idempotent() {
        let filter = FieldFilter::new(&["extra".to_owned()], &["a".to_owned(), "b".to_owned()]);
        let value = json!({"a": {"secret": 1, "extra": 2, "c": 3}, "b": [1, 2], "d": 4});
        let once = filter.filter(&value);
        assert_eq!(once, filter.filter(&once));
    }

    #[test]
    fn test_truncate() {
        assert_eq!("abc", truncate("abc".to_owned(), 0));
        assert_eq!("abc", truncate("abc".to_owned(), 3));
        assert_eq!("ab...", truncate("abc".to_owned(), 2));
        assert_eq!("ñá...", truncate("ñáé".to_owned(), 2));
    }

    #[test]
    fn test_record_name() {
        assert_eq!("n", record_name(&json!({"id": "1", "name": "n", "title": "t"})));
        assert_eq!("t", record_name(&json!({"id": "1", "name": "", "title": "t"})));
        assert_eq!("bob", record_name(&json!({"username": "bob", "email": "b@example.com"})));
        assert_eq!("7", record_name(&json!({"id": 7})));
        assert_eq!("", record_name(&json!({"other": "x"})));
        assert_eq!("", record_name(&json!("scalar")));
    }
}
