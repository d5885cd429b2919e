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

//! Fixed-width textual representation of timestamps.
//!
//! Stored timestamps always use UTC with microsecond precision and the same width so that they
//! sort correctly as plain strings inside JSON documents.

use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::FormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Canonical format of stored timestamps.
const CANONICAL: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
);

/// Format accepted by query parameters that express time ranges.
const QUERY: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Formats `t` in the canonical representation.
pub fn format(t: OffsetDateTime) -> String {
    t.to_offset(UtcOffset::UTC).format(CANONICAL).expect("Canonical format must be valid for UTC")
}

/// Parses a timestamp in the canonical representation or, failing that, in RFC 3339.
pub fn parse(s: &str) -> Result<OffsetDateTime, String> {
    match PrimitiveDateTime::parse(s, CANONICAL) {
        Ok(t) => Ok(t.assume_utc()),
        Err(_) => OffsetDateTime::parse(s, &Rfc3339)
            .map(|t| t.to_offset(UtcOffset::UTC))
            .map_err(|e| format!("Invalid timestamp '{}': {}", s, e)),
    }
}

/// Parses a `YYYY-MM-DD HH:MM:SS` timestamp from a query parameter, interpreted as UTC.
pub fn parse_query(s: &str) -> Result<OffsetDateTime, String> {
    PrimitiveDateTime::parse(s.trim(), QUERY)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| format!("Invalid time '{}': {}", s, e))
}

/// Serializes a required timestamp.
pub fn serialize<S: Serializer>(t: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(*t))
}

/// Deserializes a required timestamp.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

/// Serde helpers for optional timestamps, where `None` is represented as `null`.
pub mod option {
    use super::*;

    /// Serializes an optional timestamp.
    pub fn serialize<S: Serializer>(
        t: &Option<OffsetDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => serializer.serialize_str(&format(*t)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes an optional timestamp.  Empty strings are treated as `None`.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<OffsetDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => parse(&raw).map(Some).map_err(serde::de::Error::custom),
        }
    }
}
