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

//! Helpers to generate SQL for JSON-document tables in each dialect.

use crate::db::{DbError, DbResult, Dialect, SqlArg};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Pattern that field paths must match.
static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("Regex must be valid")
});

/// Pattern that table and index names must match.
static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Regex must be valid"));

/// Pattern of field references in raw predicates.
static RAW_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\}")
        .expect("Regex must be valid")
});

/// Pattern of a field reference compared against the placeholder that ends a raw predicate chunk.
static RAW_COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\}",
        r"\s*(<>|!=|<=|>=|=|<|>)\s*$"
    ))
    .expect("Regex must be valid")
});

/// Columns that callers can never sort by.
const ORDER_DENY_LIST: &[&str] = &["data", "deleted_at"];

/// Ensures `name` is a valid field path.
pub(crate) fn validate_field(name: &str) -> DbResult<()> {
    if FIELD_RE.is_match(name) {
        Ok(())
    } else {
        Err(DbError::InvalidQuery(format!("Invalid field name '{}'", name)))
    }
}

/// Ensures `name` is a valid table or index name.
pub(crate) fn validate_table(name: &str) -> DbResult<()> {
    if TABLE_RE.is_match(name) {
        Ok(())
    } else {
        Err(DbError::InvalidQuery(format!("Invalid table or index name '{}'", name)))
    }
}

/// Returns an expression that evaluates to `field` as text.
pub(crate) fn field_text(dialect: Dialect, field: &str) -> String {
    if field == "id" {
        return "id".to_owned();
    }
    match dialect {
        Dialect::Postgres => format!("(data #>> '{{{}}}')", field.replace('.', ",")),
        Dialect::Sqlite => format!("json_extract(data, '$.{}')", field),
    }
}

/// Returns an expression that evaluates to `field` with its JSON type, suitable for equality
/// comparisons against `value_placeholder` and for sorting.
pub(crate) fn field_json(dialect: Dialect, field: &str) -> String {
    if field == "id" {
        return "id".to_owned();
    }
    match dialect {
        Dialect::Postgres => format!("(data #> '{{{}}}')", field.replace('.', ",")),
        Dialect::Sqlite => format!("json_extract(data, '$.{}')", field),
    }
}

/// Returns the placeholder and argument to compare `value` against a `field_json` expression.
pub(crate) fn json_arg(dialect: Dialect, field: &str, value: &Value) -> (&'static str, SqlArg) {
    if field == "id" {
        return ("?", text_arg(value));
    }
    match dialect {
        Dialect::Postgres => ("?::jsonb", SqlArg::Text(value.to_string())),
        Dialect::Sqlite => ("?", native_arg(value)),
    }
}

/// Returns the argument to bind `value` in a context where the other side of the comparison
/// has the dialect's natural type for the value.
pub(crate) fn raw_arg(dialect: Dialect, value: &Value) -> SqlArg {
    match dialect {
        Dialect::Postgres => text_arg(value),
        Dialect::Sqlite => native_arg(value),
    }
}

/// Converts `value` to its textual representation.
pub(crate) fn text_arg(value: &Value) -> SqlArg {
    match value {
        Value::Null => SqlArg::Null,
        Value::String(s) => SqlArg::Text(s.clone()),
        v => SqlArg::Text(v.to_string()),
    }
}

/// Converts `value` to the SQL type that SQLite's `json_extract` would return for it.
fn native_arg(value: &Value) -> SqlArg {
    match value {
        Value::Null => SqlArg::Null,
        Value::Bool(b) => SqlArg::Int(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlArg::Int(i),
            None => SqlArg::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlArg::Text(s.clone()),
        v => SqlArg::Text(v.to_string()),
    }
}

/// Replaces `{field}` references in a raw predicate with field expressions.
pub(crate) fn expand_raw(dialect: Dialect, expr: &str) -> String {
    RAW_FIELD_RE
        .replace_all(expr, |caps: &regex::Captures<'_>| field_text(dialect, &caps[1]))
        .into_owned()
}

/// Replaces `{field}` references in a raw predicate whose placeholders take `args`.
///
/// Postgres extracts fields as text, so a field compared directly against a numeric argument is
/// cast to a number on both sides to keep the comparison numeric.
pub(crate) fn expand_raw_with_args(dialect: Dialect, expr: &str, args: &[Value]) -> String {
    if dialect != Dialect::Postgres || !args.iter().any(Value::is_number) {
        return expand_raw(dialect, expr);
    }

    let chunks = expr.split('?').collect::<Vec<_>>();
    let mut out = String::with_capacity(expr.len() * 2);
    for (i, chunk) in chunks.iter().enumerate() {
        if i == chunks.len() - 1 {
            out.push_str(&expand_raw(dialect, chunk));
            break;
        }
        let numeric = args.get(i).is_some_and(Value::is_number);
        match RAW_COMPARISON_RE.captures(chunk) {
            Some(caps) if numeric => {
                let start = caps.get(0).map(|m| m.start()).unwrap_or_default();
                out.push_str(&expand_raw(dialect, &chunk[..start]));
                out.push_str(&format!(
                    "({})::numeric {} ?::numeric",
                    field_text(dialect, &caps[1]),
                    &caps[2]
                ));
            }
            _ => {
                out.push_str(&expand_raw(dialect, chunk));
                out.push('?');
            }
        }
    }
    out
}

/// Builds an `ORDER BY` body out of a comma-separated list of `field [asc|desc]` items.
pub(crate) fn order_clause(dialect: Dialect, expr: &str) -> DbResult<String> {
    let mut items = vec![];
    for item in expr.split(',') {
        let mut tokens = item.split_whitespace();
        let field = match tokens.next() {
            Some(field) => field,
            None => return Err(DbError::InvalidQuery(format!("Empty item in order '{}'", expr))),
        };
        validate_field(field)?;
        if ORDER_DENY_LIST.contains(&field) {
            return Err(DbError::InvalidQuery(format!("Cannot sort by '{}'", field)));
        }

        let direction = match tokens.next().map(str::to_lowercase).as_deref() {
            None | Some("asc") => "ASC",
            Some("desc") => "DESC",
            Some(other) => {
                return Err(DbError::InvalidQuery(format!("Invalid sort direction '{}'", other)));
            }
        };
        if tokens.next().is_some() {
            return Err(DbError::InvalidQuery(format!("Invalid order item '{}'", item.trim())));
        }

        items.push(format!("{} {}", field_json(dialect, field), direction));
    }
    Ok(items.join(", "))
}

/// Returns a comma-separated list of `n` placeholders of the given `kind`.
pub(crate) fn placeholders(kind: &str, n: usize) -> String {
    vec![kind; n].join(", ")
}

/// Converts the `?` placeholders in `sql` to the syntax of `dialect`.
pub(crate) fn finalize(dialect: Dialect, sql: &str) -> String {
    match dialect {
        Dialect::Sqlite => sql.to_owned(),
        Dialect::Postgres => {
            let mut out = String::with_capacity(sql.len() + 16);
            let mut n = 0;
            for ch in sql.chars() {
                if ch == '?' {
                    n += 1;
                    out.push_str(&format!("${}", n));
                } else {
                    out.push(ch);
                }
            }
            out
        }
    }
}

/// Expression that reads a whole record, including its identifier, as JSON text.
pub(crate) fn document(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Postgres => "(data || jsonb_build_object('id', id))::text AS doc",
        Dialect::Sqlite => "json_set(data, '$.id', id) AS doc",
    }
}

/// Placeholder for a document value being written.
pub(crate) fn document_placeholder(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Postgres => "?::jsonb",
        Dialect::Sqlite => "?",
    }
}

/// Accumulator of `WHERE` conditions and their arguments.
#[derive(Debug, Default)]
pub(crate) struct Where {
    /// Conditions to be joined with `AND`.
    clauses: Vec<String>,

    /// Arguments for all placeholders in `clauses`, in order.
    pub(crate) args: Vec<SqlArg>,
}

impl Where {
    /// Adds a condition with its arguments.
    pub(crate) fn push<I: IntoIterator<Item = SqlArg>>(&mut self, clause: String, args: I) {
        self.clauses.push(clause);
        self.args.extend(args);
    }

    /// Renders the conditions as a `WHERE` clause, or as an empty string if there are none.
    pub(crate) fn render(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}
