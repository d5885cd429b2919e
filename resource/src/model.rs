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

//! Request and response payloads of the generic operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Maximum accepted value for `_depth`.
pub const MAX_DEPTH: usize = 99;

/// Query parameters that are not field predicates.
const PAGE: &str = "page";
/// Query parameter with the page size.
const SIZE: &str = "size";

/// Parses the boolean query parameter `key` with `raw` value.
pub(crate) fn parse_bool(key: &str, raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("Invalid boolean '{}' for {}", raw, key)),
    }
}

/// Parses the numeric query parameter `key` with `raw` value.
fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String> {
    raw.trim().parse::<T>().map_err(|_| format!("Invalid number '{}' for {}", raw, key))
}

/// Splits a comma-separated list, dropping empty items.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
}

/// Parses a time-range bound in the `YYYY-MM-DD hh:mm:ss` format, interpreted as UTC.
fn parse_time(key: &str, raw: &str) -> Result<OffsetDateTime, String> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(raw.trim(), format)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| format!("Invalid time '{}' for {}: {}", raw, key, e))
}

/// Filtering, pagination and shaping options of list, get and export requests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListParams {
    /// Page to return, starting at 1.  Zero means no pagination.
    pub page: u64,

    /// Records per page.  Zero means no pagination.
    pub size: u64,

    /// Absolute cap on the number of records.  Zero or negative means no cap.
    pub limit: i64,

    /// Whether field predicates are combined with `OR`.
    pub or: bool,

    /// Whether string predicates match substrings.
    pub fuzzy: bool,

    /// Order expression.
    pub sort_by: Option<String>,

    /// Relations to load.  `all` loads every relation of the record type.
    pub expand: Vec<String>,

    /// Nesting depth for self-referencing list relations.
    pub depth: usize,

    /// Index to force on reads.
    pub index: Option<String>,

    /// Fields to project.
    pub select: Vec<String>,

    /// Field and bounds of a time-range filter.
    pub time_range: Option<(String, OffsetDateTime, OffsetDateTime)>,

    /// Whether the cache must be bypassed.
    pub no_cache: bool,

    /// Whether counting the total number of matching records can be skipped.
    pub no_total: bool,

    /// Remaining parameters, which are equality predicates on the fields they name.
    pub fields: BTreeMap<String, String>,
}

impl ListParams {
    /// Parses the query parameters in `raw`.
    pub fn parse(raw: &HashMap<String, String>) -> Result<Self, String> {
        let mut params = ListParams { depth: 1, ..Default::default() };
        let mut column = None;
        let mut start = None;
        let mut end = None;
        for (key, value) in raw {
            match key.as_str() {
                PAGE => params.page = parse_number(key, value)?,
                SIZE => params.size = parse_number(key, value)?,
                "_limit" => params.limit = parse_number(key, value)?,
                "_or" => params.or = parse_bool(key, value)?,
                "_fuzzy" => params.fuzzy = parse_bool(key, value)?,
                "_sortby" => params.sort_by = Some(value.clone()).filter(|v| !v.trim().is_empty()),
                "_expand" => params.expand = parse_list(value),
                "_depth" => {
                    let depth = parse_number::<usize>(key, value)?;
                    if !(1..=MAX_DEPTH).contains(&depth) {
                        return Err(format!("_depth must be between 1 and {}", MAX_DEPTH));
                    }
                    params.depth = depth;
                }
                "_index" => params.index = Some(value.clone()).filter(|v| !v.trim().is_empty()),
                "_select" => params.select = parse_list(value),
                "_column_name" => column = Some(value.clone()).filter(|v| !v.trim().is_empty()),
                "_start_time" => start = Some(parse_time(key, value)?),
                "_end_time" => end = Some(parse_time(key, value)?),
                "_nocache" => params.no_cache = parse_bool(key, value)?,
                "_nototal" => params.no_total = parse_bool(key, value)?,
                key if key.starts_with('_') => (),
                key => {
                    if !value.is_empty() {
                        params.fields.insert(key.to_owned(), value.clone());
                    }
                }
            }
        }

        match (column, start, end) {
            (Some(column), Some(start), Some(end)) => {
                params.time_range = Some((column, start, end))
            }
            (Some(column), _, _) => {
                return Err(format!("Time filter on {} needs _start_time and _end_time", column));
            }
            (None, None, None) => (),
            (None, _, _) => return Err("Time filter needs _column_name".to_owned()),
        }
        Ok(params)
    }
}

/// Options of batch requests.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Whether all items are processed in a single transaction, failing the request on the first
    /// error.  Otherwise, failures are reported per item.
    pub atomic: bool,

    /// Whether deletions are physical.  Defaults to the resource's configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purge: Option<bool>,
}

/// Counts of the outcome of a batch request.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct BatchSummary {
    /// Number of items in the request.
    pub total: usize,

    /// Number of items processed successfully.
    pub succeeded: usize,

    /// Number of items that failed.
    pub failed: usize,
}

/// Body of batch requests.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct BatchRequest {
    /// Items to process, which are records or partial records depending on the operation.
    pub items: Vec<Value>,

    /// Processing options.
    pub options: BatchOptions,

    /// Ignored on input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
}

/// Body of batch responses.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BatchResponse {
    /// Processed items in the same order as in the request.  Items that failed are replaced by
    /// an object with their `id`, if known, and the `error` that occurred.
    pub items: Vec<Value>,

    /// Outcome counts.
    pub summary: BatchSummary,
}

impl BatchResponse {
    /// Builds the response for `items`, of which `failed` are placeholders for failures.
    pub fn new(items: Vec<Value>, failed: usize) -> Self {
        let summary = BatchSummary { total: items.len(), succeeded: items.len() - failed, failed };
        Self { items, summary }
    }
}

/// Response to a deletion.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DeleteResponse {
    /// Number of records that were deleted.
    pub deleted: u64,
}

/// Creates the placeholder for an item with `id` that failed with `error`.
pub fn failed_item(id: &str, error: &str) -> Value {
    serde_json::json!({"id": id, "error": error})
}
