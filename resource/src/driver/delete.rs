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

//! Deletion of records.

use crate::driver::Resource;
use crate::service::ServiceContext;
use restforge_audit::model::AuditParams;
use restforge_core::driver::DriverResult;
use restforge_core::model::Model;
use serde_json::Value;

/// Drops empty and repeated identifiers from `ids`, keeping their order.
pub(super) fn clean_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter()
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

impl<M: Model> Resource<M> {
    /// Runs the deletion stages on `items`, which only need to carry their identifiers.
    ///
    /// The deleted rows are put back if the after hooks fail.
    pub(super) async fn delete_all(
        &self,
        ctx: &ServiceContext,
        items: &mut [M],
        purge: Option<bool>,
    ) -> DriverResult<u64> {
        let dbctx = ctx.database_context();
        self.service.delete_before(ctx, items).await?;
        for item in items.iter_mut() {
            item.delete_before(&dbctx).await?;
        }
        let snapshot = self.snapshot(items).await?;
        let deleted = self
            .db
            .with_context(&dbctx)
            .with_purge(purge.unwrap_or(self.opts.purge))
            .delete(items)
            .await?;
        let after: DriverResult<()> = async {
            for item in items.iter_mut() {
                item.delete_after(&dbctx).await?;
            }
            self.service.delete_after(ctx, items).await?;
            Ok(())
        }
        .await;
        match after {
            Ok(()) => Ok(deleted),
            Err(e) => self.undo(ctx, &snapshot, e).await,
        }
    }

    /// Builds placeholder records for the given `ids`.
    pub(super) fn stubs(ids: &[String]) -> Vec<M> {
        ids.iter()
            .map(|id| {
                let mut item = M::default();
                item.set_id(Some(id));
                item
            })
            .collect()
    }

    /// Deletes the records identified by `ids` and returns how many were deleted.
    ///
    /// Empty and repeated identifiers are ignored, and an empty list of identifiers does nothing.
    /// `purge` overrides the resource's choice between physical and logical deletion.
    pub async fn delete(
        self,
        ctx: &ServiceContext,
        ids: Vec<String>,
        purge: Option<bool>,
    ) -> DriverResult<u64> {
        let ids = clean_ids(ids);
        if ids.is_empty() {
            return Ok(0);
        }

        let mut items = Self::stubs(&ids);
        let deleted = self.delete_all(ctx, &mut items, purge).await?;
        ctx.logger().debug(format_args!("Deleted {} of {} records", deleted, ids.len()));

        let params = AuditParams {
            record_id: ids.join(","),
            request: Some(Value::from(ids)),
            ..Default::default()
        };
        self.audit(ctx, params).await?;
        Ok(deleted)
    }
}
