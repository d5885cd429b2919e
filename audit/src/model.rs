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

//! Data types for the audit trail.

use async_trait::async_trait;
use restforge_core::model::{Base, Model};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Operations that can be audited.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Creation of one record.
    #[default]
    Create,

    /// Deletion of one or more records.
    Delete,

    /// Full replacement of a record.
    Update,

    /// Merge of some fields into a record.
    UpdatePartial,

    /// Listing of records.
    List,

    /// Retrieval of one record.
    Get,

    /// Creation of many records.
    BatchCreate,

    /// Deletion of many records.
    BatchDelete,

    /// Full replacement of many records.
    BatchUpdate,

    /// Merge of some fields into many records.
    BatchUpdatePartial,

    /// Download of records as a file.
    Export,

    /// Upload of records from a file.
    Import,
}

impl Operation {
    /// Returns the name of the operation as used in configuration and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Update => "update",
            Operation::UpdatePartial => "update_partial",
            Operation::List => "list",
            Operation::Get => "get",
            Operation::BatchCreate => "batch_create",
            Operation::BatchDelete => "batch_delete",
            Operation::BatchUpdate => "batch_update",
            Operation::BatchUpdatePartial => "batch_update_partial",
            Operation::Export => "export",
            Operation::Import => "import",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of an operation to audit as provided by its call site.
///
/// Payloads are given as JSON values and are filtered and serialized by the recorder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuditParams {
    /// The operation performed.
    pub operation: Operation,

    /// Table the operation acted on.
    pub table: String,

    /// Name of the record type.
    pub model: String,

    /// Identifier of the affected record, if there is a single one.
    pub record_id: String,

    /// Human-readable name of the affected record.  Derived from the record when missing.
    pub record_name: Option<String>,

    /// The affected record.
    pub record: Option<Value>,

    /// The request payload.
    pub request: Option<Value>,

    /// The response payload.
    pub response: Option<Value>,

    /// The record before the operation.
    pub old_record: Option<Value>,

    /// The record after the operation.
    pub new_record: Option<Value>,

    /// The query parameters of the request.
    pub query_params: Option<Value>,
}

/// A persisted audit entry, stored in the `audit_logs` table.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AuditLog {
    /// Common fields.  `created_at` is the time of the operation.
    #[serde(flatten)]
    pub base: Base,

    /// Name of the operation.
    pub op: String,

    /// Table the operation acted on.
    pub table: String,

    /// Name of the record type.
    pub model: String,

    /// Identifier of the affected record.
    pub record_id: String,

    /// Human-readable name of the affected record.
    pub record_name: String,

    /// Serialized affected record.
    pub record: String,

    /// Serialized request payload.
    pub request: String,

    /// Serialized response payload.
    pub response: String,

    /// Serialized record before the operation.
    pub old_record: String,

    /// Serialized record after the operation.
    pub new_record: String,

    /// Serialized query parameters.
    pub query_params: String,

    /// HTTP method of the request.
    pub method: String,

    /// URI of the request.
    pub uri: String,

    /// Address of the client.
    pub ip: String,

    /// Name of the user that performed the operation.
    pub user: String,

    /// Identifier of the request.
    pub request_id: String,

    /// User agent of the client.
    pub user_agent: String,
}

#[async_trait]
impl Model for AuditLog {
    fn table_name() -> &'static str {
        "audit_logs"
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}
