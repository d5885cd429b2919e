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

//! Fields shared by all records.

use crate::model::timestamp;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Common fields embedded in every record with `#[serde(flatten)]`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Base {
    /// Opaque, globally-unique identifier.
    pub id: String,

    /// Time of first persistence.
    #[serde(with = "timestamp::option")]
    pub created_at: Option<OffsetDateTime>,

    /// Time of the last write.
    #[serde(with = "timestamp::option")]
    pub updated_at: Option<OffsetDateTime>,

    /// User that created the record.
    pub created_by: String,

    /// User that last modified the record.
    pub updated_by: String,

    /// Free-form remark.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,

    /// Sort key chosen by users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

/// Names of the `Base` fields that only the storage layer is allowed to modify.
pub const MANAGED_FIELDS: &[&str] = &["id", "created_at", "updated_at", "created_by", "updated_by"];

/// Names of the optional `Base` fields, which count as set whenever they are not null.
pub const OPTIONAL_FIELDS: &[&str] = &["remark", "order"];
