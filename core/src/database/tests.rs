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

//! Tests for the record storage, instantiated for every supported database.

use super::*;
use crate::cache::{CacheOptions, MemoryCache};
use crate::clocks::testutils::SettableClock;
use crate::model::testutils::{Note, Tag};
use serde_json::json;
use std::time::Duration;
use time::macros::datetime;

/// State shared by the tests below.
struct TestContext {
    /// Clock used to stamp records.
    clock: Arc<SettableClock>,

    /// Handle to the notes table.
    notes: Database<Note>,

    /// Handle to the tags table.
    tags: Database<Tag>,
}

impl TestContext {
    /// Creates the tables in `db` and returns handles to them.
    async fn setup(db: Arc<dyn Db + Send + Sync>) -> Self {
        let clock = Arc::from(SettableClock::new(datetime!(2023-06-01 10:00:00 UTC)));
        let notes = Database::<Note>::new(db.clone(), clock.clone());
        notes.migrate().await.unwrap();
        let tags = Database::<Tag>::new(db, clock.clone());
        tags.migrate().await.unwrap();
        Self { clock, notes, tags }
    }

    /// Creates a note one second after the previous one and returns it.
    async fn put_note(&self, title: &str, priority: i64) -> Note {
        self.clock.advance(Duration::from_secs(1));
        let mut notes = [Note { priority, ..Note::new(title) }];
        self.notes.create(&mut notes).await.unwrap();
        notes[0].clone()
    }

    /// Creates a tag one second after the previous record and returns it.
    async fn put_tag(&self, name: &str, parent_id: &str) -> Tag {
        self.clock.advance(Duration::from_secs(1));
        let mut tags =
            [Tag { name: name.to_owned(), parent_id: parent_id.to_owned(), ..Default::default() }];
        self.tags.create(&mut tags).await.unwrap();
        tags[0].clone()
    }
}

/// Lists the records selected by `db` and returns their titles.
async fn titles(db: &Database<Note>) -> Vec<String> {
    let mut records = vec![];
    let mut cache = vec![];
    db.list(&mut records, &mut cache).await.unwrap();
    assert!(cache.is_empty());
    records.into_iter().map(|n| n.title).collect()
}

pub(super) async fn test_create_assigns_ids_and_timestamps(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let mut notes = [Note::new("first"), Note::new("second")];
    notes[1].base.id = "fixed-id".to_owned();
    context.notes.create(&mut notes).await.unwrap();

    assert_eq!(36, notes[0].id().len());
    assert_eq!("fixed-id", notes[1].id());
    let now = context.clock.now_utc();
    for note in &notes {
        assert_eq!(Some(now), note.created_at());
        assert_eq!(Some(now), note.updated_at());
    }

    let mut stored = Note::default();
    context.notes.get(&mut stored, "fixed-id", &mut vec![]).await.unwrap();
    assert_eq!(notes[1], stored);
}

pub(super) async fn test_create_duplicate_id_fails(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let mut notes = [Note::new("one")];
    notes[0].base.id = "dup".to_owned();
    context.notes.create(&mut notes).await.unwrap();
    notes[0].title = "two".to_owned();
    assert_eq!(DbError::AlreadyExists, context.notes.create(&mut notes).await.unwrap_err());
    assert_eq!(1, context.notes.count().await.unwrap());
}

pub(super) async fn test_create_in_batches(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let mut notes = (0..7).map(|i| Note::new(&format!("note {}", i))).collect::<Vec<_>>();
    context.notes.with_batch_size(3).create(&mut notes).await.unwrap();
    assert_eq!(7, context.notes.count().await.unwrap());
}

pub(super) async fn test_list_default_order_is_newest_first(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    context.put_note("a", 0).await;
    context.put_note("b", 0).await;
    context.put_note("c", 0).await;

    assert_eq!(["c", "b", "a"], titles(&context.notes).await.as_slice());
    assert_eq!(["a", "b", "c"], titles(&context.notes.with_order("title")).await.as_slice());
    assert_eq!(
        ["a", "b", "c"],
        titles(&context.notes.with_order("priority asc, created_at ASC")).await.as_slice()
    );
}

pub(super) async fn test_query_exact_and_fuzzy(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    context.put_note("groceries", 1).await;
    context.put_note("grocery list", 2).await;
    context.put_note("other", 2).await;

    let sample = Note { priority: 2, ..Default::default() };
    let found = titles(&context.notes.with_query(&sample, false)).await;
    assert_eq!(["other", "grocery list"], found.as_slice());

    let sample = Note::new("grocer");
    assert!(titles(&context.notes.with_query(&sample, false)).await.is_empty());
    let found = titles(&context.notes.with_query(&sample, true)).await;
    assert_eq!(["grocery list", "groceries"], found.as_slice());

    let sample = Note { priority: 2, ..Note::new("grocer") };
    assert_eq!(["grocery list"], titles(&context.notes.with_query(&sample, true)).await.as_slice());
}

pub(super) async fn test_query_booleans(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    context.put_note("open", 0).await;
    let mut done = [Note { done: true, ..Note::new("closed") }];
    context.notes.create(&mut done).await.unwrap();

    let sample = Note { done: true, ..Default::default() };
    assert_eq!(["closed"], titles(&context.notes.with_query(&sample, false)).await.as_slice());
}

pub(super) async fn test_query_or(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    context.put_note("a", 1).await;
    context.put_note("b", 5).await;
    context.put_note("c", 3).await;

    let sample = Note { priority: 5, ..Note::new("a") };
    assert!(titles(&context.notes.with_query(&sample, false)).await.is_empty());
    let found = titles(&context.notes.with_query(&sample, false).with_or(true)).await;
    assert_eq!(["b", "a"], found.as_slice());
}

pub(super) async fn test_query_raw(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    context.put_note("a", 1).await;
    context.put_note("b", 2).await;
    context.put_note("c", 3).await;

    let query = context
        .notes
        .with_query_raw("{priority} >= ? AND {title} <> ?", vec![json!(2), json!("c")]);
    assert_eq!(["b"], titles(&query).await.as_slice());

    // Numbers compare as numbers even where fields are extracted as text.
    context.put_note("d", 10).await;
    let query = context.notes.with_query_raw("{priority} > ?", vec![json!(9)]);
    assert_eq!(["d"], titles(&query).await.as_slice());
    let query = context.notes.with_query_raw("{priority} < ?", vec![json!(2.5)]);
    assert_eq!(["b", "a"], titles(&query).await.as_slice());

    let bad = context.notes.with_query_raw("{priority} = ?", vec![]);
    match bad.count().await {
        Err(DbError::InvalidQuery(msg)) => assert!(msg.contains("arguments")),
        e => panic!("{:?}", e),
    }
}

pub(super) async fn test_invalid_options_are_reported_by_terminals(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    for db in [
        context.notes.with_order("title; DROP TABLE notes"),
        context.notes.with_order("data"),
        context.notes.with_select(&["bad field".to_owned()]),
        context.notes.with_table("notes WHERE 1"),
        context.notes.with_expand(&["tag".to_owned()], Some("deleted_at")),
    ] {
        let mut records = vec![];
        match db.list(&mut records, &mut vec![]).await {
            Err(DbError::InvalidQuery(_)) => (),
            e => panic!("{:?}", e),
        }
    }

    // The first error wins and later valid options do not clear it.
    let db = context.notes.with_order("1bad").with_order("title");
    assert!(matches!(db.count().await, Err(DbError::InvalidQuery(_))));
}

pub(super) async fn test_time_range(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    context.put_note("a", 0).await;
    context.put_note("b", 0).await;
    context.put_note("c", 0).await;

    let start = datetime!(2023-06-01 10:00:01.500 UTC);
    let end = datetime!(2023-06-01 10:00:03 UTC);
    let found = titles(&context.notes.with_time_range("created_at", start, end)).await;
    assert_eq!(["c", "b"], found.as_slice());
}

pub(super) async fn test_scope_and_limit(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    for title in ["a", "b", "c", "d", "e"] {
        context.put_note(title, 0).await;
    }

    assert_eq!(["c", "b"], titles(&context.notes.with_scope(2, 2)).await.as_slice());
    assert_eq!(["a"], titles(&context.notes.with_scope(3, 2)).await.as_slice());
    assert!(titles(&context.notes.with_scope(4, 2)).await.is_empty());
    assert_eq!(["e", "d", "c"], titles(&context.notes.with_limit(3)).await.as_slice());
    assert_eq!(5, titles(&context.notes.with_limit(0)).await.len());
    assert_eq!(5, titles(&context.notes.with_limit(-1)).await.len());
    assert_eq!(["e"], titles(&context.notes.with_scope(1, 2).with_limit(1)).await.as_slice());

    assert_eq!(5, context.notes.with_scope(1, 2).count().await.unwrap());
}

pub(super) async fn test_scope_out_of_range(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;
    context.put_note("a", 0).await;

    for (page, size) in [(4611686018427387904, 10), (2, u64::MAX), (u64::MAX, 1)] {
        let mut notes = vec![];
        match context.notes.with_scope(page, size).list(&mut notes, &mut vec![]).await {
            Err(DbError::InvalidQuery(msg)) => assert!(msg.contains("out of range")),
            e => panic!("{:?}", e),
        }
    }

    assert_eq!(1, titles(&context.notes.with_scope(1, u64::MAX)).await.len());
}

pub(super) async fn test_excludes(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    context.put_note("visible", 1).await;
    context.put_note("hidden", 1).await;
    context.put_note("other", 2).await;

    assert_eq!(["other", "visible"], titles(&context.notes).await.as_slice());
    assert_eq!(2, context.notes.count().await.unwrap());

    let excludes = HashMap::from([("priority".to_owned(), vec![json!(2), json!(7)])]);
    assert_eq!(["visible"], titles(&context.notes.with_exclude(excludes)).await.as_slice());
}

pub(super) async fn test_soft_delete_and_cleanup(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let a = context.put_note("a", 0).await;
    let b = context.put_note("b", 0).await;

    assert_eq!(1, context.notes.delete(&[a.clone(), Note::default()]).await.unwrap());
    assert_eq!(0, context.notes.delete(&[a.clone()]).await.unwrap());
    assert_eq!(["b"], titles(&context.notes).await.as_slice());

    let mut record = Note::default();
    context.notes.get(&mut record, a.id(), &mut vec![]).await.unwrap();
    assert_eq!(Note::default(), record);

    assert_eq!(1, context.notes.cleanup().await.unwrap());
    assert_eq!(0, context.notes.cleanup().await.unwrap());

    // Updating a deleted record brings it back.
    context.notes.delete(&[b.clone()]).await.unwrap();
    context.notes.update(&mut [b]).await.unwrap();
    assert_eq!(["b"], titles(&context.notes).await.as_slice());
}

pub(super) async fn test_snapshot_and_restore(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let a = context.put_note("a", 0).await;
    let b = context.put_note("b", 0).await;
    context.notes.delete(&[b.clone()]).await.unwrap();

    let ids = [a.id().to_owned(), b.id().to_owned(), "new-id".to_owned(), "".to_owned()];
    let snapshot = context.notes.snapshot(&ids).await.unwrap();
    assert_eq!(2, snapshot.len());

    let mut changed = a.clone();
    changed.title = "changed".to_owned();
    context.notes.update(&mut [changed, b.clone()]).await.unwrap();
    let mut new = [Note::new("new")];
    new[0].base.id = "new-id".to_owned();
    context.notes.create(&mut new).await.unwrap();
    assert_eq!(3, titles(&context.notes).await.len());

    context.notes.restore(&snapshot).await.unwrap();
    assert_eq!(["a"], titles(&context.notes).await.as_slice());

    let mut record = Note::default();
    context.notes.get(&mut record, a.id(), &mut vec![]).await.unwrap();
    assert_eq!(a, record);
    context.notes.get(&mut record, "new-id", &mut vec![]).await.unwrap();
    assert_eq!(Note::default(), record);

    // The deleted record stays deleted.
    assert_eq!(1, context.notes.cleanup().await.unwrap());

    let empty = context.notes.snapshot(&[]).await.unwrap();
    assert!(empty.is_empty());
    context.notes.restore(&empty).await.unwrap();
    assert_eq!(["a"], titles(&context.notes).await.as_slice());
}

pub(super) async fn test_purge_delete(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let a = context.put_note("a", 0).await;
    context.put_note("b", 0).await;

    assert_eq!(1, context.notes.with_purge(true).delete(&[a]).await.unwrap());
    assert_eq!(0, context.notes.cleanup().await.unwrap());
    assert_eq!(["b"], titles(&context.notes).await.as_slice());
}

pub(super) async fn test_update_preserves_creation_fields(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let mut notes = [Note::new("original")];
    notes[0].set_created_by("alice");
    context.notes.create(&mut notes).await.unwrap();
    let created_at = notes[0].created_at();

    context.clock.advance(Duration::from_secs(60));
    let mut update = notes[0].clone();
    update.title = "changed".to_owned();
    update.set_created_at(Some(datetime!(2000-01-01 00:00:00 UTC)));
    update.set_created_by("mallory");
    update.set_updated_by("bob");
    context.notes.update(&mut [update.clone()]).await.unwrap();

    let mut stored = Note::default();
    context.notes.get(&mut stored, notes[0].id(), &mut vec![]).await.unwrap();
    assert_eq!("changed", stored.title);
    assert_eq!(created_at, stored.created_at());
    assert_eq!("alice", stored.created_by());
    assert_eq!("bob", stored.updated_by());
    assert_eq!(Some(context.clock.now_utc()), stored.updated_at());
}

pub(super) async fn test_update_inserts_missing(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let mut notes = [Note::new("new")];
    context.notes.update(&mut notes).await.unwrap();
    assert!(!notes[0].id().is_empty());
    assert_eq!(Some(context.clock.now_utc()), notes[0].created_at());
    assert_eq!(["new"], titles(&context.notes).await.as_slice());
}

pub(super) async fn test_update_with_omit(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let mut notes = [Note { body: "keep me".to_owned(), ..Note::new("title") }];
    context.notes.create(&mut notes).await.unwrap();

    let mut update = Note { body: String::new(), ..notes[0].clone() };
    update.title = "new title".to_owned();
    context.notes.with_omit(&["body"]).update(&mut [update]).await.unwrap();

    let mut stored = Note::default();
    context.notes.get(&mut stored, notes[0].id(), &mut vec![]).await.unwrap();
    assert_eq!("new title", stored.title);
    assert_eq!("keep me", stored.body);
}

pub(super) async fn test_update_by_id(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let note = context.put_note("a", 1).await;
    context.clock.advance(Duration::from_secs(5));
    context.notes.update_by_id(note.id(), "priority", json!(9)).await.unwrap();

    let mut stored = Note::default();
    context.notes.get(&mut stored, note.id(), &mut vec![]).await.unwrap();
    assert_eq!(9, stored.priority);
    assert_eq!("a", stored.title);
    assert_eq!(note.created_at(), stored.created_at());
    assert_eq!(Some(context.clock.now_utc()), stored.updated_at());

    assert_eq!(
        DbError::NotFound,
        context.notes.update_by_id("missing", "priority", json!(1)).await.unwrap_err()
    );
    match context.notes.update_by_id(note.id(), "created_at", json!("x")).await {
        Err(DbError::InvalidQuery(_)) => (),
        e => panic!("{:?}", e),
    }
}

pub(super) async fn test_get_missing_resets_record(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let mut record = Note::new("leftover");
    context.notes.get(&mut record, "missing", &mut vec![]).await.unwrap();
    assert_eq!(Note::default(), record);
}

pub(super) async fn test_first_last_take(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let mut record = Note::default();
    assert_eq!(DbError::NotFound, context.notes.first(&mut record).await.unwrap_err());
    assert_eq!(DbError::NotFound, context.notes.last(&mut record).await.unwrap_err());
    assert_eq!(DbError::NotFound, context.notes.take(&mut record).await.unwrap_err());

    context.put_note("a", 0).await;
    context.put_note("b", 0).await;
    context.put_note("c", 0).await;

    context.notes.first(&mut record).await.unwrap();
    assert_eq!("a", record.title);
    context.notes.last(&mut record).await.unwrap();
    assert_eq!("c", record.title);
    context.notes.with_query(&Note::new("b"), false).take(&mut record).await.unwrap();
    assert_eq!("b", record.title);
}

pub(super) async fn test_select(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let note = context.put_note("a", 3).await;

    let mut records = vec![];
    context.notes.with_select(&["title".to_owned()]).list(&mut records, &mut vec![]).await.unwrap();
    assert_eq!(1, records.len());
    assert_eq!(note.id(), records[0].id());
    assert_eq!("a", records[0].title);
    assert_eq!(0, records[0].priority);
    assert_eq!(None, records[0].created_at());
}

pub(super) async fn test_expand_relations(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let root = context.put_tag("root", "").await;
    let child = context.put_tag("child", root.id()).await;
    context.put_tag("grandchild", child.id()).await;
    for title in ["first", "second"] {
        context.clock.advance(Duration::from_secs(1));
        let mut notes = [Note { tag_id: root.id().to_owned(), ..Note::new(title) }];
        context.notes.create(&mut notes).await.unwrap();
    }
    context.put_note("untagged", 0).await;

    let mut tag = Tag::default();
    let expand = ["notes".to_owned(), "children.children".to_owned()];
    context.tags.with_expand(&expand, None).get(&mut tag, root.id(), &mut vec![]).await.unwrap();
    assert_eq!(
        ["first", "second"],
        tag.notes.iter().map(|n| n.title.as_str()).collect::<Vec<_>>().as_slice()
    );
    assert_eq!(1, tag.children.len());
    assert_eq!("child", tag.children[0].name);
    assert_eq!("grandchild", tag.children[0].children[0].name);

    context
        .tags
        .with_expand(&["notes".to_owned()], Some("title DESC"))
        .get(&mut tag, root.id(), &mut vec![])
        .await
        .unwrap();
    assert_eq!("second", tag.notes[0].title);
    assert!(tag.children.is_empty());

    let mut notes = vec![];
    context
        .notes
        .with_expand(&["tag.children".to_owned()], None)
        .with_order("title")
        .list(&mut notes, &mut vec![])
        .await
        .unwrap();
    assert_eq!(3, notes.len());
    let tag = notes[0].tag.as_ref().unwrap();
    assert_eq!("root", tag.name);
    assert_eq!("child", tag.children[0].name);
    assert_eq!("untagged", notes[2].title);
    assert_eq!(None, notes[2].tag);

    let mut tags = vec![];
    let query = context.tags.with_expand(&["unknown".to_owned()], None);
    match query.list(&mut tags, &mut vec![]).await {
        Err(DbError::InvalidQuery(msg)) => assert!(msg.contains("unknown")),
        e => panic!("{:?}", e),
    }
}

pub(super) async fn test_relations_are_not_persisted(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;

    let tag = context.put_tag("tag", "").await;
    let mut notes = [Note {
        tag_id: tag.id().to_owned(),
        tag: Some(Box::new(tag.clone())),
        ..Note::new("a")
    }];
    context.notes.create(&mut notes).await.unwrap();

    let mut stored = Note::default();
    context.notes.get(&mut stored, notes[0].id(), &mut vec![]).await.unwrap();
    assert_eq!(None, stored.tag);
    assert_eq!(tag.id(), stored.tag_id);
}

pub(super) async fn test_cache(db: Arc<dyn Db + Send + Sync>) {
    let context = TestContext::setup(db).await;
    let cache = Arc::from(MemoryCache::new(&CacheOptions::default()));
    let notes = context.notes.with_cache_backend(cache).with_cache(true);

    let a = context.put_note("a", 0).await;

    let mut records = vec![];
    let mut buffer = vec![];
    notes.list(&mut records, &mut buffer).await.unwrap();
    assert_eq!(1, records.len());
    assert!(buffer.is_empty());

    notes.list(&mut records, &mut buffer).await.unwrap();
    assert!(records.is_empty());
    let cached: Vec<Note> = serde_json::from_slice(&buffer).unwrap();
    assert_eq!(vec![a.clone()], cached);

    let mut record = Note::default();
    notes.get(&mut record, a.id(), &mut buffer).await.unwrap();
    assert_eq!(a, record);
    notes.get(&mut record, a.id(), &mut buffer).await.unwrap();
    assert_eq!(Note::default(), record);
    assert_eq!(a, serde_json::from_slice::<Note>(&buffer).unwrap());

    // Writes through the cached handle invalidate previous results.
    context.clock.advance(Duration::from_secs(1));
    notes.create(&mut [Note::new("b")]).await.unwrap();
    notes.list(&mut records, &mut buffer).await.unwrap();
    assert_eq!(2, records.len());
    assert!(buffer.is_empty());

    // Handles without the cache flag bypass it.
    notes.with_cache(false).list(&mut records, &mut buffer).await.unwrap();
    assert_eq!(2, records.len());
}

/// Instantiates all record storage tests for the database returned by `setup`.
macro_rules! generate_database_tests [
    ( $setup:expr $(, #[$extra:meta])? ) => {
        $crate::db::testutils::generate_tests!(
            $( #[$extra], )?
            $setup,
            $crate::database::tests,
            test_create_assigns_ids_and_timestamps,
            test_create_duplicate_id_fails,
            test_create_in_batches,
            test_list_default_order_is_newest_first,
            test_query_exact_and_fuzzy,
            test_query_booleans,
            test_query_or,
            test_query_raw,
            test_invalid_options_are_reported_by_terminals,
            test_time_range,
            test_scope_and_limit,
            test_scope_out_of_range,
            test_excludes,
            test_soft_delete_and_cleanup,
            test_purge_delete,
            test_snapshot_and_restore,
            test_update_preserves_creation_fields,
            test_update_inserts_missing,
            test_update_with_omit,
            test_update_by_id,
            test_get_missing_resets_record,
            test_first_last_take,
            test_select,
            test_expand_relations,
            test_relations_are_not_persisted,
            test_cache
        );
    }
];

#[cfg(feature = "sqlite")]
mod sqlite {
    use crate::db::Db;
    use crate::db::sqlite::testutils::setup;
    use std::sync::Arc;

    generate_database_tests!({
        let db: Arc<dyn Db + Send + Sync> = Arc::from(setup().await);
        db
    });
}

#[cfg(feature = "postgres")]
mod postgres {
    use crate::db::Db;
    use crate::db::postgres::testutils::setup;
    use std::sync::Arc;

    generate_database_tests!(
        {
            let db: Arc<dyn Db + Send + Sync> = Arc::from(setup().await);
            db
        },
        #[ignore = "Requires environment configuration and is expensive"]
    );
}

#[test]
fn test_flatten_non_zero() {
    let doc = json!({"a": 1, "b": "", "c": {"d": true, "e": 0}, "f": [1], "g": null});
    let mut out = vec![];
    flatten_non_zero("", &doc, &mut out);
    assert_eq!(vec![("a".to_owned(), json!(1)), ("c.d".to_owned(), json!(true))], out);
}

#[test]
fn test_value_paths() {
    let mut doc = json!({"a": {"b": 1}});
    assert_eq!(Some(&json!(1)), value_at(&doc, "a.b"));
    assert_eq!(None, value_at(&doc, "a.c"));

    *value_at_mut(&mut doc, "x.y").unwrap() = json!("new");
    assert_eq!(json!({"a": {"b": 1}, "x": {"y": "new"}}), doc);

    remove_at(&mut doc, "a.b");
    remove_at(&mut doc, "missing.path");
    assert_eq!(json!({"a": {}, "x": {"y": "new"}}), doc);
}
