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

//! Reads of records: listings, single records and downloads.

use crate::driver::{Resource, invalid_input, model_name, to_json};
use crate::model::{ListParams, parse_bool};
use crate::service::ServiceContext;
use restforge_audit::model::AuditParams;
use restforge_core::database::Database;
use restforge_core::driver::{DriverError, DriverResult};
use restforge_core::model::Model;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Result of a read that may have been served from the cache.
#[derive(Debug, PartialEq)]
pub enum Payload<T> {
    /// Freshly fetched records, which went through the after hooks.
    Records(T),

    /// Serialized records as stored in the cache.
    Cached(Vec<u8>),
}

/// Result of a listing.
#[derive(Debug, PartialEq)]
pub struct Listing<M> {
    /// The page of records.
    pub items: Payload<Vec<M>>,

    /// Number of records matching the query regardless of pagination, unless skipped.
    pub total: Option<i64>,
}

/// Converts the raw field predicates in `fields` into a record whose non-zero fields are the
/// predicates, using the types of the fields of a default record to interpret the raw values.
///
/// Parameters that do not name a field of `M` are ignored.
fn predicates<M: Model>(fields: &BTreeMap<String, String>) -> DriverResult<M> {
    let defaults = to_json(&M::default()).unwrap_or(Value::Null);
    let mut query = Map::new();
    for (field, raw) in fields {
        let value = match defaults.get(field) {
            Some(Value::String(_)) => Value::String(raw.clone()),
            Some(Value::Bool(_)) => {
                Value::Bool(parse_bool(field, raw).map_err(DriverError::InvalidInput)?)
            }
            Some(Value::Number(_)) => match (raw.trim().parse::<i64>(), raw.trim().parse::<f64>()) {
                (Ok(i), _) => Value::from(i),
                (Err(_), Ok(f)) => Value::from(f),
                (Err(_), Err(_)) => {
                    return Err(DriverError::InvalidInput(format!(
                        "Invalid number '{}' for {}",
                        raw, field
                    )));
                }
            },
            _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())),
        };
        query.insert(field.clone(), value);
    }
    serde_json::from_value(Value::Object(query)).map_err(invalid_input)
}

/// Computes the relation paths to load for the requested `names`.
///
/// `all` selects every relation of `M`.  Relations that hold lists of the same type as their
/// owner are loaded `depth` levels deep.
pub(crate) fn resolve_expand<M: Model>(names: &[String], depth: usize) -> Vec<String> {
    let names = if names.iter().any(|n| n == "all") { M::expands() } else { names.to_vec() };
    let relations = M::relations();
    names
        .into_iter()
        .map(|name| {
            let recursive = relations
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.is_many() && (r.relations)().iter().any(|nested| nested.name == r.name))
                .unwrap_or(false);
            if recursive && depth > 1 { vec![name.as_str(); depth].join(".") } else { name }
        })
        .collect()
}

/// Parses the raw query parameters of a read.
fn parse(raw: &HashMap<String, String>) -> DriverResult<ListParams> {
    ListParams::parse(raw).map_err(DriverError::InvalidInput)
}

/// Converts the raw query parameters to their audited form.
fn query_params(raw: &HashMap<String, String>) -> Option<Value> {
    let sorted = raw.iter().collect::<BTreeMap<_, _>>();
    to_json(&sorted)
}

impl<M: Model> Resource<M> {
    /// Builds the storage query for a listing described by `params`.
    ///
    /// Runs the before hooks, which can add predicates.
    async fn query(&self, ctx: &ServiceContext, params: &ListParams) -> DriverResult<Database<M>> {
        let dbctx = ctx.database_context();
        let mut query = predicates::<M>(&params.fields)?;
        self.service.list_before(ctx, &mut query).await?;
        self.service.filter(ctx, &mut query).await?;
        query.list_before(&dbctx).await?;

        let mut db =
            self.db.with_context(&dbctx).with_query(&query, params.fuzzy).with_or(params.or);
        if let Some((expr, args)) = self.service.filter_raw(ctx).await? {
            db = db.with_query_raw(&expr, args);
        }
        if let Some(order) = &params.sort_by {
            db = db.with_order(order);
        }
        if params.size > 0 {
            db = db.with_scope(params.page, params.size);
        }
        db = db.with_limit(params.limit);
        if let Some(index) = &params.index {
            db = db.with_index(index);
        }
        db = db.with_select(&params.select);
        if let Some((field, start, end)) = &params.time_range {
            db = db.with_time_range(field, *start, *end);
        }
        if !params.expand.is_empty() {
            db = db.with_expand(&resolve_expand::<M>(&params.expand, params.depth), None);
        }
        Ok(db.with_cache(!params.no_cache))
    }

    /// Runs the after-listing hooks on freshly fetched `items`.
    async fn list_after(&self, ctx: &ServiceContext, items: &mut [M]) -> DriverResult<()> {
        let dbctx = ctx.database_context();
        for item in items.iter_mut() {
            item.list_after(&dbctx).await?;
        }
        self.service.list_after(ctx, items).await?;
        Ok(())
    }

    /// Lists the records that match the query parameters in `raw`.
    pub async fn list(
        self,
        ctx: &ServiceContext,
        raw: &HashMap<String, String>,
    ) -> DriverResult<Listing<M>> {
        let params = parse(raw)?;
        let db = self.query(ctx, &params).await?;

        let mut items = vec![];
        let mut cached = vec![];
        db.list(&mut items, &mut cached).await?;
        let total = if params.no_total { None } else { Some(db.count().await?) };

        let items = if cached.is_empty() {
            self.list_after(ctx, &mut items).await?;
            ctx.logger().debug(format_args!("Listed {} records", items.len()));
            Payload::Records(items)
        } else {
            ctx.logger().debug("Listed records from cache");
            Payload::Cached(cached)
        };

        let params = AuditParams { query_params: query_params(raw), ..Default::default() };
        self.audit(ctx, params).await?;
        Ok(Listing { items, total })
    }

    /// Fetches the record identified by `id`, honoring the expansion and caching parameters in
    /// `raw`.
    pub async fn get(
        self,
        ctx: &ServiceContext,
        id: &str,
        raw: &HashMap<String, String>,
    ) -> DriverResult<Payload<M>> {
        let not_found = || DriverError::NotFound(format!("{} {} not found", model_name::<M>(), id));
        if id.trim().is_empty() {
            return Err(not_found());
        }
        let params = parse(raw)?;
        let dbctx = ctx.database_context();

        self.service.get_before(ctx, id).await?;
        let mut record = M::default();
        record.get_before(&dbctx).await?;

        let mut db = self.db.with_context(&dbctx).with_select(&params.select);
        if !params.expand.is_empty() {
            db = db.with_expand(&resolve_expand::<M>(&params.expand, params.depth), None);
        }
        let mut cached = vec![];
        db.with_cache(!params.no_cache).get(&mut record, id, &mut cached).await?;

        let payload = if !cached.is_empty() {
            Payload::Cached(cached)
        } else if record.id().is_empty() {
            return Err(not_found());
        } else {
            record.get_after(&dbctx).await?;
            self.service.get_after(ctx, &mut record).await?;
            Payload::Records(record)
        };

        let params = AuditParams {
            record_id: id.to_owned(),
            query_params: query_params(raw),
            ..Default::default()
        };
        self.audit(ctx, params).await?;
        Ok(payload)
    }

    /// Lists the records that match the query parameters in `raw`, bypassing the cache, and
    /// serializes them for download.
    pub async fn export(
        self,
        ctx: &ServiceContext,
        raw: &HashMap<String, String>,
    ) -> DriverResult<Vec<u8>> {
        let mut params = parse(raw)?;
        params.no_cache = true;
        let db = self.query(ctx, &params).await?;

        let mut items = vec![];
        db.list(&mut items, &mut vec![]).await?;
        self.list_after(ctx, &mut items).await?;
        let data = self.service.export(ctx, &items).await?;
        ctx.logger()
            .debug(format_args!("Exported {} records in {} bytes", items.len(), data.len()));

        let params = AuditParams { query_params: query_params(raw), ..Default::default() };
        self.audit(ctx, params).await?;
        Ok(data)
    }
}
