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

//! The record contract shared by every persisted entity.
//!
//! Records are plain serde structs that embed a `Base` (flattened) and implement `Model`.  The
//! storage layer never inspects record fields directly: it works on their JSON representation,
//! which is why the contract is expressed in terms of serde bounds.

use crate::context::DatabaseContext;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use time::OffsetDateTime;

mod base;
pub use base::{Base, MANAGED_FIELDS, OPTIONAL_FIELDS};
mod relation;
pub use relation::{Relation, RelationKind};
pub(crate) use relation::find as find_relation;
pub mod timestamp;

/// Generic error type for model-level validation failures.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("{0}")]
pub struct ModelError(pub String);

/// Result type for this module.
pub type ModelResult<T> = Result<T, ModelError>;

/// Contract that every persisted record type satisfies.
///
/// Setters mutate records in place because all layers of a request observe the same instance.
#[async_trait]
pub trait Model:
    Serialize + DeserializeOwned + Default + Clone + Debug + Send + Sync + 'static
{
    /// Name of the table that holds records of this type.
    fn table_name() -> &'static str;

    /// Returns the embedded common fields.
    fn base(&self) -> &Base;

    /// Returns the embedded common fields for modification.
    fn base_mut(&mut self) -> &mut Base;

    /// Returns the identifier of the record, which is empty if it has not been assigned yet.
    fn id(&self) -> &str {
        &self.base().id
    }

    /// Sets the identifier of the record.
    ///
    /// With `None`, assigns a fresh UUID only if the record does not have an identifier yet.
    fn set_id(&mut self, id: Option<&str>) {
        let base = self.base_mut();
        match id {
            Some(id) => base.id = id.to_owned(),
            None if base.id.is_empty() => base.id = uuid::Uuid::new_v4().to_string(),
            None => (),
        }
    }

    /// Returns the creation time of the record, if persisted.
    fn created_at(&self) -> Option<OffsetDateTime> {
        self.base().created_at
    }

    /// Sets the creation time of the record.
    fn set_created_at(&mut self, t: Option<OffsetDateTime>) {
        self.base_mut().created_at = t;
    }

    /// Returns the last modification time of the record, if persisted.
    fn updated_at(&self) -> Option<OffsetDateTime> {
        self.base().updated_at
    }

    /// Sets the last modification time of the record.
    fn set_updated_at(&mut self, t: Option<OffsetDateTime>) {
        self.base_mut().updated_at = t;
    }

    /// Returns who created the record.
    fn created_by(&self) -> &str {
        &self.base().created_by
    }

    /// Sets who created the record.
    fn set_created_by(&mut self, user: &str) {
        self.base_mut().created_by = user.to_owned();
    }

    /// Returns who last modified the record.
    fn updated_by(&self) -> &str {
        &self.base().updated_by
    }

    /// Sets who last modified the record.
    fn set_updated_by(&mut self, user: &str) {
        self.base_mut().updated_by = user.to_owned();
    }

    /// Relationships that can be eagerly loaded with `Database::with_expand`.
    fn relations() -> Vec<Relation> {
        vec![]
    }

    /// Names of the relationships eligible for eager loading.
    fn expands() -> Vec<String> {
        Self::relations().into_iter().map(|r| r.name.to_owned()).collect()
    }

    /// Field values that must never be returned by lists and gets, keyed by field name.
    fn excludes(&self) -> HashMap<String, Vec<Value>> {
        HashMap::default()
    }

    /// Invoked before creating the record.  An error aborts the operation.
    async fn create_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked after creating the record.  An error fails the request.
    async fn create_after(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked before deleting the record.  An error aborts the operation.
    async fn delete_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked after deleting the record.  An error fails the request.
    async fn delete_after(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked before replacing the record.  An error aborts the operation.
    async fn update_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked after replacing the record.  An error fails the request.
    async fn update_after(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked before patching the record.  An error aborts the operation.
    async fn update_partial_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked after patching the record.  An error fails the request.
    async fn update_partial_after(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked before listing records.  An error aborts the operation.
    async fn list_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked after listing records.  An error fails the request.
    async fn list_after(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked before fetching the record.  An error aborts the operation.
    async fn get_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }

    /// Invoked after fetching the record.  An error fails the request.
    async fn get_after(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        Ok(())
    }
}

/// Returns true if `value` is the zero value of its JSON type.
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.values().all(is_zero),
    }
}

/// Test utilities.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use super::*;
    use serde::Deserialize;

    /// A minimal record type for tests.
    #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
    #[serde(default)]
    pub struct Note {
        /// Common fields.
        #[serde(flatten)]
        pub base: Base,

        /// Short title of the note.
        pub title: String,

        /// Free-form body.
        pub body: String,

        /// Priority used to exercise numeric predicates.
        pub priority: i64,

        /// Flag used to exercise boolean predicates.
        pub done: bool,

        /// Optional owner, which refers to a `Tag` record.
        pub tag_id: String,

        /// Expanded owner.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub tag: Option<Box<Tag>>,
    }

    impl Note {
        /// Creates a note with the given `title`.
        pub fn new(title: &str) -> Self {
            Self { title: title.to_owned(), ..Default::default() }
        }
    }

    #[async_trait]
    impl Model for Note {
        fn table_name() -> &'static str {
            "notes"
        }

        fn base(&self) -> &Base {
            &self.base
        }

        fn base_mut(&mut self) -> &mut Base {
            &mut self.base
        }

        fn relations() -> Vec<Relation> {
            vec![Relation::belongs_to::<Tag>("tag", "tag_id")]
        }

        fn excludes(&self) -> HashMap<String, Vec<Value>> {
            HashMap::from([("title".to_owned(), vec![Value::from("hidden")])])
        }

        async fn create_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
            if self.title.trim().is_empty() {
                return Err(ModelError("Notes need a title".to_owned()));
            }
            Ok(())
        }
    }

    /// A record type that owns many notes, used to exercise relations.
    #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
    #[serde(default)]
    pub struct Tag {
        /// Common fields.
        #[serde(flatten)]
        pub base: Base,

        /// Name of the tag.
        pub name: String,

        /// Parent tag, for nesting.
        pub parent_id: String,

        /// Expanded notes with this tag.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub notes: Vec<Note>,

        /// Expanded child tags.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub children: Vec<Tag>,
    }

    #[async_trait]
    impl Model for Tag {
        fn table_name() -> &'static str {
            "tags"
        }

        fn base(&self) -> &Base {
            &self.base
        }

        fn base_mut(&mut self) -> &mut Base {
            &mut self.base
        }

        fn relations() -> Vec<Relation> {
            vec![
                Relation::has_many::<Note>("notes", "tag_id"),
                Relation::has_many::<Tag>("children", "parent_id"),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutils::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_id_assigns_only_when_empty() {
        let mut note = Note::new("a");
        assert!(note.id().is_empty());

        note.set_id(None);
        let id = note.id().to_owned();
        assert_eq!(36, id.len());

        note.set_id(None);
        assert_eq!(id, note.id());

        note.set_id(Some("explicit"));
        assert_eq!("explicit", note.id());
    }

    #[test]
    fn test_expands_follow_relations() {
        assert_eq!(vec!["tag".to_owned()], Note::expands());
        assert_eq!(vec!["notes".to_owned(), "children".to_owned()], Tag::expands());
    }

    #[test]
    fn test_is_zero() {
        assert!(is_zero(&json!(null)));
        assert!(is_zero(&json!(false)));
        assert!(is_zero(&json!(0)));
        assert!(is_zero(&json!(0.0)));
        assert!(is_zero(&json!("")));
        assert!(is_zero(&json!([])));
        assert!(is_zero(&json!({"a": 0, "b": ""})));

        assert!(!is_zero(&json!(true)));
        assert!(!is_zero(&json!(-1)));
        assert!(!is_zero(&json!("x")));
        assert!(!is_zero(&json!([0])));
        assert!(!is_zero(&json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_default_hooks_succeed() {
        let ctx = DatabaseContext::default();
        let mut tag = Tag::default();
        tag.create_before(&ctx).await.unwrap();
        tag.delete_after(&ctx).await.unwrap();
        tag.get_before(&ctx).await.unwrap();

        let mut note = Note::default();
        assert_eq!(
            ModelError("Notes need a title".to_owned()),
            note.create_before(&ctx).await.unwrap_err()
        );
    }
}
