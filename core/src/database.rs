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

//! Fluent access to the records of a table.
//!
//! A `Database<M>` is a cheap, immutable view over the storage of records of type `M`.  Every
//! `with_*` method returns a new view with one more option applied, leaving the original view
//! untouched, and the terminal operations (`create`, `list`, `get`, etc.) execute the query that
//! the options describe.
//!
//! Records are stored as JSON documents in tables with the layout
//! `(id TEXT PRIMARY KEY, data <json>, deleted_at TEXT)`, which lets this module handle any
//! record type without per-type SQL.  Invalid options are remembered and reported by the next
//! terminal operation.

use crate::cache::{Cache, scoped_key};
use crate::clocks::Clock;
use crate::context::DatabaseContext;
use crate::db::{Db, DbError, DbResult, Dialect, Executor, SqlArg};
use crate::model::{MANAGED_FIELDS, Model, is_zero, timestamp};
use derivative::Derivative;
use log::info;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use time::OffsetDateTime;

mod expand;
mod sql;
use sql::Where;

/// Default number of records written per statement.
const DEFAULT_BATCH_SIZE: usize = 100;

/// Default sort order of lists.
const DEFAULT_ORDER: &str = "created_at DESC";

/// Sort order of expanded relations when none is given.
const DEFAULT_EXPAND_ORDER: &str = "created_at ASC";

/// Options accumulated by the `with_*` methods.
#[derive(Clone, Debug, Default)]
struct Options {
    /// First validation error found while building the query.
    error: Option<String>,

    /// Table name override.
    table: Option<String>,

    /// Whether to log generated statements.
    debug: bool,

    /// Predicates derived from a sample record, as `(field, value)` pairs.
    query: Vec<(String, Value)>,

    /// Whether `query` predicates use `LIKE` for strings.
    fuzzy: bool,

    /// Whether `query` predicates are joined with `OR`.
    or: bool,

    /// Raw predicates with their arguments.
    raw: Vec<(String, Vec<Value>)>,

    /// Time range filter as `(field, start, end)`.
    time_range: Option<(String, OffsetDateTime, OffsetDateTime)>,

    /// Number of records written per statement.
    batch_size: Option<usize>,

    /// Pagination as `(page, size)`, with pages starting at 1.
    scope: Option<(u64, u64)>,

    /// Absolute row cap.
    limit: Option<u64>,

    /// Negative filters as `(field, disallowed values)`.
    excludes: Vec<(String, Vec<Value>)>,

    /// Validated `ORDER BY` source expression.
    order: Option<String>,

    /// Relation paths to load.
    expand: Vec<String>,

    /// Validated `ORDER BY` source expression for expanded relations.
    expand_order: Option<String>,

    /// Whether deletions are physical.
    purge: bool,

    /// Whether the cache may be used.
    use_cache: bool,

    /// Fields to leave untouched on writes.
    omit: Vec<String>,

    /// Fields to project on reads.
    select: Vec<String>,

    /// Index to force on reads.
    index: Option<String>,

    /// Context of the request issuing the operations.
    ctx: Option<DatabaseContext>,
}

impl Options {
    /// Records `e` as the validation error of the query unless there already is one.
    fn fail(&mut self, e: DbError) {
        if self.error.is_none() {
            self.error = Some(e.to_string());
        }
    }
}

/// Flattens the non-zero leaves of `value` into `(path, value)` pairs.
fn flatten_non_zero(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(fields) => {
            for (key, field) in fields {
                let path =
                    if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
                flatten_non_zero(&path, field, out);
            }
        }
        Value::Array(_) => (),
        leaf if !is_zero(leaf) => out.push((prefix.to_owned(), leaf.clone())),
        _ => (),
    }
}

/// Returns a mutable reference to the value at the dotted `path` of `doc`, creating
/// intermediate objects as necessary.
fn value_at_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = doc;
    for part in path.split('.') {
        if !current.is_object() {
            *current = Value::Object(Map::default());
        }
        current = current.as_object_mut()?.entry(part.to_owned()).or_insert(Value::Null);
    }
    Some(current)
}

/// Returns the value at the dotted `path` of `doc`.
fn value_at<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Removes the value at the dotted `path` of `doc`, if present.
fn remove_at(doc: &mut Value, path: &str) {
    let mut parts = path.split('.').collect::<Vec<_>>();
    let last = match parts.pop() {
        Some(last) => last,
        None => return,
    };
    let mut current = doc;
    for part in parts {
        match current.get_mut(part) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(object) = current.as_object_mut() {
        object.remove(last);
    }
}

/// Stored rows of some records, captured by `Database::snapshot` so that later writes to them
/// can be undone with `Database::restore`.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Identifiers of the captured records, whether they were stored or not.
    ids: Vec<String>,

    /// Captured rows as `(id, data, deleted_at)`, with an empty `deleted_at` for live rows.
    rows: Vec<(String, String, String)>,
}

impl Snapshot {
    /// Returns the number of rows that existed when the snapshot was taken.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if none of the captured records existed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// View over the records of type `M`.
#[derive(Derivative)]
#[derivative(Clone(bound = ""))]
pub struct Database<M> {
    /// Handle to the underlying database.
    db: Arc<dyn Db + Send + Sync>,

    /// Clock used to stamp records.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Cache for serialized query results, if any.
    cache: Option<Arc<dyn Cache + Send + Sync>>,

    /// Options applied to the next terminal operation.
    opts: Options,

    /// Marker for the record type.
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Database<M> {
    /// Creates a view over the records of type `M` stored in `db`.
    pub fn new(db: Arc<dyn Db + Send + Sync>, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { db, clock, cache: None, opts: Options::default(), _model: PhantomData }
    }

    /// Returns a copy of this view with `apply` run on its options.
    fn with<F: FnOnce(&mut Options)>(&self, apply: F) -> Self {
        let mut copy = self.clone();
        apply(&mut copy.opts);
        copy
    }

    /// Swaps the underlying database handle.
    pub fn with_db(&self, db: Arc<dyn Db + Send + Sync>) -> Self {
        let mut copy = self.clone();
        copy.db = db;
        copy
    }

    /// Attaches a cache that `with_cache(true)` reads from and that writes invalidate.
    pub fn with_cache_backend(&self, cache: Arc<dyn Cache + Send + Sync>) -> Self {
        let mut copy = self.clone();
        copy.cache = Some(cache);
        copy
    }

    /// Records the request context for logging purposes.
    pub fn with_context(&self, ctx: &DatabaseContext) -> Self {
        self.with(|o| o.ctx = Some(ctx.clone()))
    }

    /// Overrides the table name.
    pub fn with_table(&self, name: &str) -> Self {
        self.with(|o| match sql::validate_table(name) {
            Ok(()) => o.table = Some(name.to_owned()),
            Err(e) => o.fail(e),
        })
    }

    /// Logs the generated statements.
    pub fn with_debug(&self) -> Self {
        self.with(|o| o.debug = true)
    }

    /// Filters by equality (or substring, if `fuzzy`) on every non-zero field of `record`.
    pub fn with_query(&self, record: &M, fuzzy: bool) -> Self {
        self.with(|o| {
            let mut doc = match serde_json::to_value(record) {
                Ok(doc) => doc,
                Err(e) => return o.fail(e.into()),
            };
            expand::strip(&mut doc, &M::relations());
            flatten_non_zero("", &doc, &mut o.query);
            o.fuzzy = fuzzy;
        })
    }

    /// Adds a raw predicate.  Fields are referenced as `{name}` and arguments as `?`.
    pub fn with_query_raw(&self, expr: &str, args: Vec<Value>) -> Self {
        self.with(|o| {
            if expr.matches('?').count() != args.len() {
                o.fail(DbError::InvalidQuery(format!(
                    "Predicate '{}' does not match {} arguments",
                    expr,
                    args.len()
                )));
            } else {
                o.raw.push((expr.to_owned(), args));
            }
        })
    }

    /// Filters records whose `field` falls within `[start, end]`.
    pub fn with_time_range(&self, field: &str, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        self.with(|o| match sql::validate_field(field) {
            Ok(()) => o.time_range = Some((field.to_owned(), start, end)),
            Err(e) => o.fail(e),
        })
    }

    /// Writes records in batches of `size`.
    pub fn with_batch_size(&self, size: usize) -> Self {
        self.with(|o| o.batch_size = Some(size.max(1)))
    }

    /// Returns the `page`-th page (starting at 1) of `size` records.
    pub fn with_scope(&self, page: u64, size: u64) -> Self {
        self.with(|o| o.scope = if size == 0 { None } else { Some((page.max(1), size)) })
    }

    /// Returns at most `limit` records.  Zero or negative values disable the cap.
    pub fn with_limit(&self, limit: i64) -> Self {
        self.with(|o| o.limit = u64::try_from(limit).ok().filter(|l| *l > 0))
    }

    /// Skips records whose fields take any of the given disallowed values.
    pub fn with_exclude(&self, excludes: HashMap<String, Vec<Value>>) -> Self {
        self.with(|o| {
            let mut excludes = excludes.into_iter().collect::<Vec<_>>();
            excludes.sort_by(|a, b| a.0.cmp(&b.0));
            for (field, values) in excludes {
                if let Err(e) = sql::validate_field(&field) {
                    return o.fail(e);
                }
                o.excludes.push((field, values));
            }
        })
    }

    /// Sorts by a comma-separated list of `field [asc|desc]` items.
    pub fn with_order(&self, order: &str) -> Self {
        self.with(|o| match sql::order_clause(Dialect::Sqlite, order) {
            Ok(_) => o.order = Some(order.to_owned()),
            Err(e) => o.fail(e),
        })
    }

    /// Loads the named relations, sorting related records by `order` if given.
    ///
    /// Names can be chained with dots to load nested relations, as in `children.children`.
    pub fn with_expand(&self, relations: &[String], order: Option<&str>) -> Self {
        self.with(|o| {
            for path in relations.iter().filter(|p| !p.is_empty()) {
                if let Err(e) = sql::validate_field(path) {
                    return o.fail(e);
                }
                o.expand.push(path.clone());
            }
            if let Some(order) = order {
                match sql::order_clause(Dialect::Sqlite, order) {
                    Ok(_) => o.expand_order = Some(order.to_owned()),
                    Err(e) => o.fail(e),
                }
            }
        })
    }

    /// Deletes rows physically instead of marking them as deleted.
    pub fn with_purge(&self, purge: bool) -> Self {
        self.with(|o| o.purge = purge)
    }

    /// Allows looking up and filling the cache.
    pub fn with_cache(&self, enable: bool) -> Self {
        self.with(|o| o.use_cache = enable)
    }

    /// Leaves the given fields untouched on writes.
    pub fn with_omit(&self, fields: &[&str]) -> Self {
        self.with(|o| {
            for field in fields {
                if let Err(e) = sql::validate_field(field) {
                    return o.fail(e);
                }
                o.omit.push((*field).to_owned());
            }
        })
    }

    /// Projects reads onto the given fields.  The identifier is always returned.
    pub fn with_select(&self, fields: &[String]) -> Self {
        self.with(|o| {
            for field in fields.iter().filter(|f| !f.is_empty()) {
                if let Err(e) = sql::validate_field(field) {
                    return o.fail(e);
                }
                o.select.push(field.clone());
            }
        })
    }

    /// Joins the predicates of `with_query` with `OR` instead of `AND`.
    pub fn with_or(&self, or: bool) -> Self {
        self.with(|o| o.or = or)
    }

    /// Forces the use of `index` on reads, where the backend supports it.
    pub fn with_index(&self, index: &str) -> Self {
        self.with(|o| match sql::validate_table(index) {
            Ok(()) => o.index = Some(index.to_owned()),
            Err(e) => o.fail(e),
        })
    }

    /// Returns the table the view operates on, or the first validation error of the query.
    fn table(&self) -> DbResult<String> {
        if let Some(e) = &self.opts.error {
            return Err(DbError::InvalidQuery(e.clone()));
        }
        let table = self.opts.table.clone().unwrap_or_else(|| M::table_name().to_owned());
        sql::validate_table(&table)?;
        Ok(table)
    }

    /// Logs `sql` and `args` if debugging is enabled.
    fn trace(&self, sql: &str, args: &[SqlArg]) {
        if self.opts.debug {
            let request_id = self.opts.ctx.as_ref().map(|c| c.request_id.as_str()).unwrap_or("");
            info!("[sql] request_id={} {} {:?}", request_id, sql, args);
        }
    }

    /// Runs a statement on `ex`.
    async fn execute(&self, ex: &mut Executor, sql: &str, args: &[SqlArg]) -> DbResult<u64> {
        let sql = sql::finalize(ex.dialect(), sql);
        self.trace(&sql, args);
        ex.execute(&sql, args).await
    }

    /// Runs a query on `ex` that returns documents.
    async fn fetch_docs(
        &self,
        ex: &mut Executor,
        sql: &str,
        args: &[SqlArg],
    ) -> DbResult<Vec<Value>> {
        let sql = sql::finalize(ex.dialect(), sql);
        self.trace(&sql, args);
        let rows = ex.fetch_strings(&sql, args, "doc").await?;
        rows.iter().map(|row| serde_json::from_str::<Value>(row).map_err(DbError::from)).collect()
    }

    /// Builds the conditions shared by all reads.
    fn conditions(&self, dialect: Dialect) -> Where {
        let mut conds = Where::default();
        conds.push("deleted_at IS NULL".to_owned(), []);

        if !self.opts.query.is_empty() {
            let mut clauses = vec![];
            let mut args = vec![];
            for (field, value) in &self.opts.query {
                match value {
                    Value::String(s) if self.opts.fuzzy => {
                        clauses.push(format!("{} LIKE ?", sql::field_text(dialect, field)));
                        args.push(SqlArg::Text(format!("%{}%", s)));
                    }
                    value => {
                        let (placeholder, arg) = sql::json_arg(dialect, field, value);
                        let field = sql::field_json(dialect, field);
                        clauses.push(format!("{} = {}", field, placeholder));
                        args.push(arg);
                    }
                }
            }
            let joiner = if self.opts.or { " OR " } else { " AND " };
            conds.push(format!("({})", clauses.join(joiner)), args);
        }

        for (expr, args) in &self.opts.raw {
            conds.push(
                format!("({})", sql::expand_raw_with_args(dialect, expr, args)),
                args.iter().map(|v| sql::raw_arg(dialect, v)),
            );
        }

        if let Some((field, start, end)) = &self.opts.time_range {
            let expr = sql::field_text(dialect, field);
            conds.push(
                format!("{} >= ? AND {} <= ?", expr, expr),
                [SqlArg::Text(timestamp::format(*start)), SqlArg::Text(timestamp::format(*end))],
            );
        }

        let mut excludes = self.opts.excludes.clone();
        let mut model_excludes = M::default().excludes().into_iter().collect::<Vec<_>>();
        model_excludes.sort_by(|a, b| a.0.cmp(&b.0));
        excludes.extend(model_excludes.into_iter().filter(|(f, _)| sql::validate_field(f).is_ok()));
        for (field, values) in excludes.iter().filter(|(_, v)| !v.is_empty()) {
            let mut placeholders = vec![];
            let mut args = vec![];
            for value in values {
                let (placeholder, arg) = sql::json_arg(dialect, field, value);
                placeholders.push(placeholder);
                args.push(arg);
            }
            let expr = sql::field_json(dialect, field);
            conds.push(
                format!("({} IS NULL OR {} NOT IN ({}))", expr, expr, placeholders.join(", ")),
                args,
            );
        }

        conds
    }

    /// Builds the `SELECT` statement for reads, without pagination.
    fn select_sql(
        &self,
        dialect: Dialect,
        table: &str,
        conds: &Where,
        order: Option<&str>,
    ) -> DbResult<String> {
        let index = match (&self.opts.index, dialect) {
            (Some(index), Dialect::Sqlite) => format!(" INDEXED BY {}", index),
            _ => String::new(),
        };
        let mut query =
            format!("SELECT {} FROM {}{}{}", sql::document(dialect), table, index, conds.render());
        if let Some(order) = order {
            query.push_str(&format!(" ORDER BY {}", sql::order_clause(dialect, order)?));
        }
        Ok(query)
    }

    /// Computes the `LIMIT`/`OFFSET` suffix for reads.
    ///
    /// Fails if the scope does not fit in the signed 64-bit range that backends accept.
    fn pagination(&self, dialect: Dialect) -> DbResult<String> {
        let (limit, offset) = match self.opts.scope {
            Some((page, size)) => {
                let offset = (page - 1)
                    .checked_mul(size)
                    .filter(|o| i64::try_from(*o).is_ok())
                    .ok_or_else(|| {
                        let msg = format!("Page {} of size {} is out of range", page, size);
                        DbError::InvalidQuery(msg)
                    })?;
                (Some(size), offset)
            }
            None => (None, 0),
        };
        let limit = match (limit, self.opts.limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let limit = limit.map(|l| l.min(i64::MAX as u64));
        Ok(match (limit, offset) {
            (Some(limit), 0) => format!(" LIMIT {}", limit),
            (Some(limit), offset) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (None, 0) => String::new(),
            (None, offset) => match dialect {
                Dialect::Postgres => format!(" OFFSET {}", offset),
                Dialect::Sqlite => format!(" LIMIT -1 OFFSET {}", offset),
            },
        })
    }

    /// Loads relations into `docs` and applies the projection.
    async fn post_process(&self, ex: &mut Executor, docs: &mut [Value]) -> DbResult<()> {
        if !self.opts.expand.is_empty() {
            let order = self.opts.expand_order.as_deref().unwrap_or(DEFAULT_EXPAND_ORDER);
            let order = sql::order_clause(ex.dialect(), order)?;
            expand::expand(ex, docs, &M::relations(), &self.opts.expand, &order).await?;
        }

        if !self.opts.select.is_empty() {
            for doc in docs.iter_mut() {
                let mut projected = Value::Object(Map::default());
                if let Some(id) = doc.get("id") {
                    if let Some(slot) = value_at_mut(&mut projected, "id") {
                        *slot = id.clone();
                    }
                }
                for field in &self.opts.select {
                    if let Some(value) = value_at(doc, field).cloned() {
                        if let Some(slot) = value_at_mut(&mut projected, field) {
                            *slot = value;
                        }
                    }
                }
                *doc = projected;
            }
        }
        Ok(())
    }

    /// Returns the cache key for a read identified by `query`, if the cache may be used.
    async fn cache_key(&self, table: &str, query: &str, args: &[SqlArg]) -> Option<String> {
        match (&self.cache, self.opts.use_cache) {
            (Some(cache), true) => {
                let generation = cache.generation(table).await;
                let query = format!(
                    "{} {:?} expand={:?}/{:?} select={:?}",
                    query, args, self.opts.expand, self.opts.expand_order, self.opts.select
                );
                Some(scoped_key(table, generation, &query))
            }
            _ => None,
        }
    }

    /// Invalidates cached reads of `table` after a write.
    async fn invalidate(&self, table: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(table).await;
        }
    }

    /// Serializes `record` as the document to be stored.
    fn to_document(record: &M) -> DbResult<Value> {
        let mut doc = serde_json::to_value(record)?;
        expand::strip(&mut doc, &M::relations());
        if let Some(object) = doc.as_object_mut() {
            object.remove("id");
        }
        Ok(doc)
    }

    /// Decodes a fetched document into a record.
    fn from_document(doc: Value) -> DbResult<M> {
        Ok(serde_json::from_value::<M>(doc)?)
    }

    /// Creates the table and its indexes if they do not exist yet.
    pub async fn migrate(&self) -> DbResult<()> {
        let table = self.table()?;
        let mut ex = self.db.ex().await?;
        let data_type = match ex.dialect() {
            Dialect::Postgres => "JSONB",
            Dialect::Sqlite => "TEXT",
        };
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} \
             (id TEXT PRIMARY KEY, data {} NOT NULL, deleted_at TEXT)",
            table, data_type
        );
        self.execute(&mut ex, &create, &[]).await?;
        let index = format!(
            "CREATE INDEX IF NOT EXISTS {}_deleted_at ON {} (deleted_at)",
            table, table
        );
        self.execute(&mut ex, &index, &[]).await?;
        Ok(())
    }

    /// Inserts `records`, assigning identifiers and timestamps to those that lack them.
    ///
    /// All records are inserted in a single transaction.
    pub async fn create(&self, records: &mut [M]) -> DbResult<()> {
        let table = self.table()?;
        if records.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_utc();
        let mut rows = Vec::with_capacity(records.len());
        for record in records.iter_mut() {
            record.set_id(None);
            if record.created_at().is_none() {
                record.set_created_at(Some(now));
            }
            if record.updated_at().is_none() {
                record.set_updated_at(Some(now));
            }
            let mut doc = Self::to_document(record)?;
            for field in &self.opts.omit {
                remove_at(&mut doc, field);
            }
            rows.push((record.id().to_owned(), doc));
        }

        let mut tx = self.db.begin().await?;
        let dialect = tx.ex().dialect();
        for chunk in rows.chunks(self.opts.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)) {
            let values = format!("(?, {})", sql::document_placeholder(dialect));
            let query = format!(
                "INSERT INTO {} (id, data) VALUES {}",
                table,
                vec![values.as_str(); chunk.len()].join(", ")
            );
            let mut args = Vec::with_capacity(chunk.len() * 2);
            for (id, doc) in chunk {
                args.push(SqlArg::Text(id.clone()));
                args.push(SqlArg::Text(doc.to_string()));
            }
            self.execute(tx.ex(), &query, &args).await?;
        }
        tx.commit().await?;
        self.invalidate(&table).await;

        if !self.opts.expand.is_empty() {
            let mut ex = self.db.ex().await?;
            let mut docs =
                records.iter().map(serde_json::to_value).collect::<Result<Vec<Value>, _>>()?;
            self.post_process(&mut ex, &mut docs).await?;
            for (record, doc) in records.iter_mut().zip(docs) {
                *record = Self::from_document(doc)?;
            }
        }
        Ok(())
    }

    /// Deletes `records`, either by marking them as deleted or physically with `with_purge`.
    ///
    /// Records without an identifier are ignored.  Returns the number of affected rows.
    pub async fn delete(&self, records: &[M]) -> DbResult<u64> {
        let table = self.table()?;
        let ids = records.iter().map(|r| r.id()).filter(|id| !id.is_empty()).collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(0);
        }

        let now = timestamp::format(self.clock.now_utc());
        let mut affected = 0;
        let mut tx = self.db.begin().await?;
        for chunk in ids.chunks(self.opts.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)) {
            let mut args = vec![];
            let query = if self.opts.purge {
                let ids = sql::placeholders("?", chunk.len());
                format!("DELETE FROM {} WHERE id IN ({})", table, ids)
            } else {
                args.push(SqlArg::Text(now.clone()));
                format!(
                    "UPDATE {} SET deleted_at = ? WHERE deleted_at IS NULL AND id IN ({})",
                    table,
                    sql::placeholders("?", chunk.len())
                )
            };
            args.extend(chunk.iter().map(|id| SqlArg::Text((*id).to_owned())));
            affected += self.execute(tx.ex(), &query, &args).await?;
        }
        tx.commit().await?;
        self.invalidate(&table).await;
        Ok(affected)
    }

    /// Fetches the stored documents, including deleted ones, for `ids` keyed by identifier.
    async fn existing(
        &self,
        ex: &mut Executor,
        table: &str,
        ids: &[String],
    ) -> DbResult<HashMap<String, Value>> {
        let mut existing = HashMap::default();
        if ids.is_empty() {
            return Ok(existing);
        }
        let query = format!(
            "SELECT {} FROM {} WHERE id IN ({})",
            sql::document(ex.dialect()),
            table,
            sql::placeholders("?", ids.len())
        );
        let args = ids.iter().map(|id| SqlArg::Text(id.clone())).collect::<Vec<_>>();
        for doc in self.fetch_docs(ex, &query, &args).await? {
            if let Some(id) = doc.get("id").and_then(Value::as_str).map(str::to_owned) {
                existing.insert(id, doc);
            }
        }
        Ok(existing)
    }

    /// Writes `records`, inserting those that do not exist and replacing those that do.
    ///
    /// The creation time and creator of existing records are always preserved, and the fields
    /// named by `with_omit` keep their stored values.
    pub async fn update(&self, records: &mut [M]) -> DbResult<()> {
        let table = self.table()?;
        if records.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_utc();
        let batch_size = self.opts.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let mut tx = self.db.begin().await?;
        let dialect = tx.ex().dialect();
        for chunk in records.chunks_mut(batch_size) {
            for record in chunk.iter_mut() {
                record.set_id(None);
            }
            let ids = chunk.iter().map(|r| r.id().to_owned()).collect::<Vec<_>>();
            let existing = self.existing(tx.ex(), &table, &ids).await?;

            let mut args = Vec::with_capacity(chunk.len() * 2);
            for record in chunk.iter_mut() {
                let old = existing.get(record.id());
                let old_created_at = old
                    .and_then(|o| o.get("created_at"))
                    .and_then(Value::as_str)
                    .and_then(|s| timestamp::parse(s).ok());
                let old_created_by = old
                    .and_then(|o| o.get("created_by"))
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty());

                record.set_created_at(old_created_at.or(record.created_at()).or(Some(now)));
                if let Some(created_by) = old_created_by {
                    record.set_created_by(created_by);
                }
                record.set_updated_at(Some(now));

                let mut doc = Self::to_document(record)?;
                for field in &self.opts.omit {
                    match old.and_then(|o| value_at(o, field)).cloned() {
                        Some(value) => {
                            if let Some(slot) = value_at_mut(&mut doc, field) {
                                *slot = value;
                            }
                        }
                        None => remove_at(&mut doc, field),
                    }
                }
                args.push(SqlArg::Text(record.id().to_owned()));
                args.push(SqlArg::Text(doc.to_string()));
            }

            let values = format!("(?, {}, NULL)", sql::document_placeholder(dialect));
            let query = format!(
                "INSERT INTO {} (id, data, deleted_at) VALUES {} \
                 ON CONFLICT (id) DO UPDATE SET data = excluded.data, deleted_at = NULL",
                table,
                vec![values.as_str(); chunk.len()].join(", ")
            );
            self.execute(tx.ex(), &query, &args).await?;
        }
        tx.commit().await?;
        self.invalidate(&table).await;
        Ok(())
    }

    /// Sets the single `field` of the record identified by `id` to `value`.
    pub async fn update_by_id(&self, id: &str, field: &str, value: Value) -> DbResult<()> {
        let table = self.table()?;
        sql::validate_field(field)?;
        if MANAGED_FIELDS.contains(&field) {
            return Err(DbError::InvalidQuery(format!("Field '{}' cannot be updated", field)));
        }

        let mut tx = self.db.begin().await?;
        let dialect = tx.ex().dialect();
        let query = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND id = ?",
            sql::document(dialect),
            table
        );
        let mut docs = self.fetch_docs(tx.ex(), &query, &[SqlArg::Text(id.to_owned())]).await?;
        let mut doc = match docs.pop() {
            Some(doc) => doc,
            None => return Err(DbError::NotFound),
        };

        if let Some(slot) = value_at_mut(&mut doc, field) {
            *slot = value;
        }
        if let Some(slot) = value_at_mut(&mut doc, "updated_at") {
            *slot = Value::String(timestamp::format(self.clock.now_utc()));
        }
        let record = Self::from_document(doc)?;
        let doc = Self::to_document(&record)?;

        let placeholder = sql::document_placeholder(dialect);
        let query = format!("UPDATE {} SET data = {} WHERE id = ?", table, placeholder);
        self.execute(tx.ex(), &query, &[SqlArg::Text(doc.to_string()), SqlArg::Text(id.to_owned())])
            .await?;
        tx.commit().await?;
        self.invalidate(&table).await;
        Ok(())
    }

    /// Lists the records that match the query into `records`.
    ///
    /// If the cache is enabled and holds the result, `records` is left empty and `cache` receives
    /// the serialized records instead.
    pub async fn list(&self, records: &mut Vec<M>, cache: &mut Vec<u8>) -> DbResult<()> {
        let table = self.table()?;
        records.clear();
        cache.clear();

        let mut ex = self.db.ex().await?;
        let dialect = ex.dialect();
        let conds = self.conditions(dialect);
        let order = self.opts.order.as_deref().unwrap_or(DEFAULT_ORDER);
        let query =
            self.select_sql(dialect, &table, &conds, Some(order))? + &self.pagination(dialect)?;

        let key = self.cache_key(&table, &query, &conds.args).await;
        if let (Some(key), Some(backend)) = (&key, &self.cache) {
            if let Some(hit) = backend.get(key).await {
                *cache = hit;
                return Ok(());
            }
        }

        let mut docs = self.fetch_docs(&mut ex, &query, &conds.args).await?;
        self.post_process(&mut ex, &mut docs).await?;
        drop(ex);

        if let (Some(key), Some(backend)) = (&key, &self.cache) {
            backend.set(key, serde_json::to_vec(&docs)?).await;
        }
        for doc in docs {
            records.push(Self::from_document(doc)?);
        }
        Ok(())
    }

    /// Fetches the record identified by `id` into `record`.
    ///
    /// A missing record is not an error: `record` is reset to its default value instead.  If the
    /// cache is enabled and holds the result, `cache` receives the serialized record.
    pub async fn get(&self, record: &mut M, id: &str, cache: &mut Vec<u8>) -> DbResult<()> {
        let table = self.table()?;
        cache.clear();
        *record = M::default();
        if id.is_empty() {
            return Ok(());
        }

        let mut ex = self.db.ex().await?;
        let dialect = ex.dialect();
        let mut conds = self.conditions(dialect);
        conds.push("id = ?".to_owned(), [SqlArg::Text(id.to_owned())]);
        let query = self.select_sql(dialect, &table, &conds, None)? + " LIMIT 1";

        let key = self.cache_key(&table, &query, &conds.args).await;
        if let (Some(key), Some(backend)) = (&key, &self.cache) {
            if let Some(hit) = backend.get(key).await {
                *cache = hit;
                return Ok(());
            }
        }

        let mut docs = self.fetch_docs(&mut ex, &query, &conds.args).await?;
        self.post_process(&mut ex, &mut docs).await?;
        drop(ex);

        if let Some(doc) = docs.pop() {
            if let (Some(key), Some(backend)) = (&key, &self.cache) {
                backend.set(key, serde_json::to_vec(&doc)?).await;
            }
            *record = Self::from_document(doc)?;
        }
        Ok(())
    }

    /// Fetches the single record that matches the query sorted by `order`.
    async fn fetch_one(&self, record: &mut M, order: Option<&str>) -> DbResult<()> {
        let table = self.table()?;
        let mut ex = self.db.ex().await?;
        let dialect = ex.dialect();
        let conds = self.conditions(dialect);
        let query = self.select_sql(dialect, &table, &conds, order)? + " LIMIT 1";

        let mut docs = self.fetch_docs(&mut ex, &query, &conds.args).await?;
        self.post_process(&mut ex, &mut docs).await?;
        match docs.pop() {
            Some(doc) => {
                *record = Self::from_document(doc)?;
                Ok(())
            }
            None => Err(DbError::NotFound),
        }
    }

    /// Fetches the oldest record that matches the query.
    pub async fn first(&self, record: &mut M) -> DbResult<()> {
        self.fetch_one(record, Some("created_at ASC, id ASC")).await
    }

    /// Fetches the newest record that matches the query.
    pub async fn last(&self, record: &mut M) -> DbResult<()> {
        self.fetch_one(record, Some("created_at DESC, id DESC")).await
    }

    /// Fetches any record that matches the query.
    pub async fn take(&self, record: &mut M) -> DbResult<()> {
        self.fetch_one(record, None).await
    }

    /// Counts the records that match the query, ignoring pagination.
    pub async fn count(&self) -> DbResult<i64> {
        let table = self.table()?;
        let mut ex = self.db.ex().await?;
        let dialect = ex.dialect();
        let conds = self.conditions(dialect);
        let query = format!("SELECT COUNT(*) AS count FROM {}{}", table, conds.render());
        let query = sql::finalize(dialect, &query);
        self.trace(&query, &conds.args);
        ex.fetch_i64(&query, &conds.args, "count").await
    }

    /// Physically removes all records previously marked as deleted.
    pub async fn cleanup(&self) -> DbResult<u64> {
        let table = self.table()?;
        let mut ex = self.db.ex().await?;
        let query = format!("DELETE FROM {} WHERE deleted_at IS NOT NULL", table);
        let affected = self.execute(&mut ex, &query, &[]).await?;
        drop(ex);
        self.invalidate(&table).await;
        Ok(affected)
    }

    /// Fetches the values of the single `col` column produced by `sql`.
    async fn fetch_column(
        &self,
        ex: &mut Executor,
        sql: &str,
        args: &[SqlArg],
    ) -> DbResult<Vec<String>> {
        let sql = sql::finalize(ex.dialect(), sql);
        self.trace(&sql, args);
        ex.fetch_strings(&sql, args, "col").await
    }

    /// Captures the stored rows, including deleted ones, of the records identified by `ids`.
    pub async fn snapshot(&self, ids: &[String]) -> DbResult<Snapshot> {
        let table = self.table()?;
        let ids = ids.iter().filter(|id| !id.is_empty()).cloned().collect::<Vec<_>>();
        let mut rows = vec![];
        if ids.is_empty() {
            return Ok(Snapshot { ids, rows });
        }

        let mut ex = self.db.ex().await?;
        let data = match ex.dialect() {
            Dialect::Postgres => "data::text",
            Dialect::Sqlite => "data",
        };
        for chunk in ids.chunks(self.opts.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)) {
            let select = |expr: &str| {
                format!(
                    "SELECT {} AS col FROM {} WHERE id IN ({}) ORDER BY id",
                    expr,
                    table,
                    sql::placeholders("?", chunk.len())
                )
            };
            let args = chunk.iter().map(|id| SqlArg::Text(id.clone())).collect::<Vec<_>>();
            let found = self.fetch_column(&mut ex, &select("id"), &args).await?;
            let docs = self.fetch_column(&mut ex, &select(data), &args).await?;
            let deleted =
                self.fetch_column(&mut ex, &select("COALESCE(deleted_at, '')"), &args).await?;
            if found.len() != docs.len() || found.len() != deleted.len() {
                return Err(DbError::BackendError(format!(
                    "Rows of {} changed while taking a snapshot",
                    table
                )));
            }
            rows.extend(
                found.into_iter().zip(docs).zip(deleted).map(|((id, doc), del)| (id, doc, del)),
            );
        }
        Ok(Snapshot { ids, rows })
    }

    /// Puts back the rows captured in `snapshot`, undoing any write made to them since.
    ///
    /// Records that did not exist when the snapshot was taken are physically removed.
    pub async fn restore(&self, snapshot: &Snapshot) -> DbResult<()> {
        let table = self.table()?;
        if snapshot.ids.is_empty() {
            return Ok(());
        }

        let batch_size = self.opts.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let mut tx = self.db.begin().await?;
        let dialect = tx.ex().dialect();
        for chunk in snapshot.ids.chunks(batch_size) {
            let query = format!(
                "DELETE FROM {} WHERE id IN ({})",
                table,
                sql::placeholders("?", chunk.len())
            );
            let args = chunk.iter().map(|id| SqlArg::Text(id.clone())).collect::<Vec<_>>();
            self.execute(tx.ex(), &query, &args).await?;
        }
        let values = format!("(?, {}, NULLIF(?, ''))", sql::document_placeholder(dialect));
        for chunk in snapshot.rows.chunks(batch_size) {
            let query = format!(
                "INSERT INTO {} (id, data, deleted_at) VALUES {}",
                table,
                vec![values.as_str(); chunk.len()].join(", ")
            );
            let mut args = Vec::with_capacity(chunk.len() * 3);
            for (id, doc, deleted_at) in chunk {
                args.push(SqlArg::Text(id.clone()));
                args.push(SqlArg::Text(doc.clone()));
                args.push(SqlArg::Text(deleted_at.clone()));
            }
            self.execute(tx.ex(), &query, &args).await?;
        }
        tx.commit().await?;
        self.invalidate(&table).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
