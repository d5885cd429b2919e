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

//! Eager loading of relations into already-fetched documents.

use crate::database::sql::{self, Where};
use crate::db::{DbError, DbResult, Executor, SqlArg};
use crate::model::{Relation, RelationKind, find_relation};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;

/// Maximum number of keys to look up in a single query.
const KEYS_PER_QUERY: usize = 500;

/// Fetches all live documents from `table` whose `field` is one of `keys`.
async fn fetch_by_keys(
    ex: &mut Executor,
    table: &str,
    field: &str,
    keys: &[String],
    order: &str,
) -> DbResult<Vec<Value>> {
    let dialect = ex.dialect();
    let mut docs = vec![];
    for chunk in keys.chunks(KEYS_PER_QUERY) {
        let mut conds = Where::default();
        conds.push("deleted_at IS NULL".to_owned(), []);
        conds.push(
            format!(
                "{} IN ({})",
                sql::field_text(dialect, field),
                sql::placeholders("?", chunk.len())
            ),
            chunk.iter().map(|k| SqlArg::Text(k.clone())),
        );
        let query = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            sql::document(dialect),
            table,
            conds.render(),
            order
        );
        let rows = ex.fetch_strings(&sql::finalize(dialect, &query), &conds.args, "doc").await?;
        for row in rows {
            docs.push(serde_json::from_str::<Value>(&row)?);
        }
    }
    Ok(docs)
}

/// Returns the string value of `field` in `doc`, if any and not empty.
fn str_field<'a>(doc: &'a Value, field: &str) -> Option<&'a str> {
    let mut current = doc;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    current.as_str().filter(|s| !s.is_empty())
}

/// Expands the relation path `segments` (such as `["children", "children"]`) of `docs`, whose
/// type declares `relations`.
fn expand_path<'a>(
    ex: &'a mut Executor,
    docs: &'a mut [Value],
    relations: Vec<Relation>,
    segments: &'a [&'a str],
    order: &'a str,
) -> BoxFuture<'a, DbResult<()>> {
    async move {
        let (name, rest) = match segments.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };
        let relation = find_relation(&relations, name)
            .ok_or_else(|| DbError::InvalidQuery(format!("Unknown relation '{}'", name)))?
            .clone();

        let mut keys = match relation.kind {
            RelationKind::HasMany => {
                docs.iter()
                    .filter_map(|d| str_field(d, "id"))
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            }
            RelationKind::BelongsTo => docs
                .iter()
                .filter_map(|d| str_field(d, relation.key))
                .map(str::to_owned)
                .collect::<Vec<_>>(),
        };
        keys.sort();
        keys.dedup();

        let lookup_field = match relation.kind {
            RelationKind::HasMany => relation.key,
            RelationKind::BelongsTo => "id",
        };
        let mut related = if keys.is_empty() {
            vec![]
        } else {
            fetch_by_keys(ex, relation.table, lookup_field, &keys, order).await?
        };
        if !rest.is_empty() {
            expand_path(ex, &mut related, (relation.relations)(), rest, order).await?;
        }

        match relation.kind {
            RelationKind::HasMany => {
                let mut groups: HashMap<String, Vec<Value>> = HashMap::default();
                for doc in related {
                    if let Some(owner) = str_field(&doc, relation.key).map(str::to_owned) {
                        groups.entry(owner).or_default().push(doc);
                    }
                }
                for doc in docs.iter_mut() {
                    let children = str_field(doc, "id")
                        .and_then(|id| groups.get(id))
                        .cloned()
                        .unwrap_or_default();
                    if let Some(object) = doc.as_object_mut() {
                        object.insert(relation.name.to_owned(), Value::Array(children));
                    }
                }
            }
            RelationKind::BelongsTo => {
                let by_id: HashMap<String, Value> = related
                    .into_iter()
                    .filter_map(|doc| str_field(&doc, "id").map(str::to_owned).map(|id| (id, doc)))
                    .collect();
                for doc in docs.iter_mut() {
                    let parent = str_field(doc, relation.key)
                        .and_then(|id| by_id.get(id))
                        .cloned()
                        .unwrap_or(Value::Null);
                    if let Some(object) = doc.as_object_mut() {
                        object.insert(relation.name.to_owned(), parent);
                    }
                }
            }
        }
        Ok(())
    }
    .boxed()
}

/// Loads every relation in `paths` into `docs`, whose type declares `relations`.
///
/// Each path is a dot-separated chain of relation names, which allows loading nested relations
/// such as `children.children`.  Related records are sorted by `order`, which must be a valid
/// `ORDER BY` body.
pub(crate) async fn expand(
    ex: &mut Executor,
    docs: &mut [Value],
    relations: &[Relation],
    paths: &[String],
    order: &str,
) -> DbResult<()> {
    for path in paths {
        let segments = path.split('.').collect::<Vec<&str>>();
        expand_path(ex, docs, relations.to_vec(), &segments, order).await?;
    }
    Ok(())
}

/// Removes the relation fields of `relations` from `doc` so that they are not persisted.
pub(crate) fn strip(doc: &mut Value, relations: &[Relation]) {
    if let Some(object) = doc.as_object_mut() {
        for relation in relations {
            object.remove(relation.name);
        }
    }
}
