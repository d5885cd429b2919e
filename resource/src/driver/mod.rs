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

//! Business logic of the generic operations.
//!
//! Every operation follows the same sequence: service hooks before, model hooks before, storage
//! operation, model hooks after, service hooks after and audit.  The stages that act on a slice
//! of records are shared by the single-record operations and their batch variants.

use derivative::Derivative;
use restforge_audit::driver::AuditRecorder;
use restforge_audit::model::AuditParams;
use restforge_core::database::{Database, Snapshot};
use restforge_core::driver::{DriverError, DriverResult};
use restforge_core::model::Model;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::service::{Service, ServiceContext};

mod batch;
mod create;
mod delete;
mod import;
pub use import::{MAX_IMPORT_SIZE, sniff};
mod list;
pub use list::{Listing, Payload};
mod merge;
pub use merge::merge;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
mod update;

/// Per-resource settings.
#[derive(Clone, Debug, Default)]
pub struct ResourceOptions {
    /// Whether deletions are physical instead of marking records as deleted.
    pub purge: bool,
}

/// Returns the unqualified name of the record type `M`.
pub fn model_name<M>() -> &'static str {
    let name = std::any::type_name::<M>();
    let name = name.split('<').next().unwrap_or(name);
    name.rsplit("::").next().unwrap_or(name)
}

/// Serializes `value` for audit purposes, which tolerates failures.
fn to_json<T: Serialize + ?Sized>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Serializes processed records for a response.
fn encode_all<T: Serialize>(records: &[T]) -> DriverResult<Vec<Value>> {
    records
        .iter()
        .map(|record| serde_json::to_value(record).map_err(|e| DriverError::Failure(e.to_string())))
        .collect()
}

/// Converts a JSON error on client-provided data into a driver error.
fn invalid_input(e: serde_json::Error) -> DriverError {
    DriverError::InvalidInput(e.to_string())
}

/// The set of operations on records of type `M`.
#[derive(Derivative)]
#[derivative(Clone(bound = ""))]
pub struct Resource<M> {
    /// Name of the resource, which is also the path it is mounted at.
    name: String,

    /// Storage for the records.
    db: Database<M>,

    /// Domain logic.
    service: Arc<dyn Service<M>>,

    /// Recorder for audit entries, if auditing is enabled.
    audit: Option<AuditRecorder>,

    /// Settings.
    opts: ResourceOptions,
}

impl<M: Model> Resource<M> {
    /// Creates the resource `name` over the records in `db` with domain logic from `service`.
    pub fn new<S: Into<String>>(name: S, db: Database<M>, service: Arc<dyn Service<M>>) -> Self {
        Self { name: name.into(), db, service, audit: None, opts: ResourceOptions::default() }
    }

    /// Records audit entries of the operations in `audit`.
    pub fn with_audit(mut self, audit: AuditRecorder) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Replaces the settings of the resource.
    pub fn with_options(mut self, opts: ResourceOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the storage for the records.
    pub fn db(&self) -> &Database<M> {
        &self.db
    }

    /// Records the audit entry `params` for the operation in `ctx`.
    async fn audit(&self, ctx: &ServiceContext, params: AuditParams) -> DriverResult<()> {
        let recorder = match &self.audit {
            Some(recorder) => recorder,
            None => return Ok(()),
        };
        let params = AuditParams {
            operation: ctx.operation,
            table: M::table_name().to_owned(),
            model: model_name::<M>().to_owned(),
            ..params
        };
        recorder.record(&ctx.request, params).await
    }

    /// Captures the stored rows of `items` so that a failed write stage can be undone.
    async fn snapshot(&self, items: &[M]) -> DriverResult<Snapshot> {
        let ids = items.iter().map(|item| item.id().to_owned()).collect::<Vec<_>>();
        Ok(self.db.snapshot(&ids).await?)
    }

    /// Puts back the rows in `snapshot` after the after hooks of a stage failed with `err`.
    ///
    /// Always returns `err`; a failure to restore is only logged.
    async fn undo<T>(
        &self,
        ctx: &ServiceContext,
        snapshot: &Snapshot,
        err: DriverError,
    ) -> DriverResult<T> {
        if let Err(e) = self.db.restore(snapshot).await {
            ctx.logger().warn(format_args!("Cannot undo writes to {}: {}", M::table_name(), e));
        }
        Err(err)
    }

    /// Fetches the live record identified by `id` before modifying it.
    async fn read_back(&self, id: &str) -> DriverResult<M> {
        if id.is_empty() {
            return Err(DriverError::InvalidInput("Missing record id".to_owned()));
        }
        let mut found = vec![];
        self.db
            .with_limit(1)
            .with_query_raw("{id} = ?", vec![Value::from(id)])
            .list(&mut found, &mut vec![])
            .await?;
        match (found.pop(), found.is_empty()) {
            (Some(record), true) => Ok(record),
            _ => Err(DriverError::NotFound(format!("{} {} not found", model_name::<M>(), id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restforge_core::model::testutils::{Note, Tag};

    #[test]
    fn test_model_name() {
        assert_eq!("Note", model_name::<Note>());
        assert_eq!("Tag", model_name::<Tag>());
        assert_eq!("Vec", model_name::<Vec<Note>>());
    }
}
