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

//! Full and partial updates of records.

use crate::driver::{Resource, merge, to_json};
use crate::service::ServiceContext;
use restforge_audit::model::AuditParams;
use restforge_core::driver::DriverResult;
use restforge_core::model::Model;
use serde_json::Value;

impl<M: Model> Resource<M> {
    /// Carries the creation fields of `olds` over to `items` and stamps them as updated by the
    /// caller.
    fn carry_over(ctx: &ServiceContext, items: &mut [M], olds: &[M]) {
        for (item, old) in items.iter_mut().zip(olds) {
            item.set_id(Some(old.id()));
            item.set_created_at(old.created_at());
            item.set_created_by(old.created_by());
            item.set_updated_by(ctx.username());
        }
    }

    /// Runs the replacement stages on `items`, whose stored versions are `olds`.
    ///
    /// The stored versions are put back if the after hooks fail.
    pub(super) async fn update_all(
        &self,
        ctx: &ServiceContext,
        items: &mut [M],
        olds: &[M],
    ) -> DriverResult<()> {
        let dbctx = ctx.database_context();
        Self::carry_over(ctx, items, olds);
        self.service.update_before(ctx, items).await?;
        for item in items.iter_mut() {
            item.update_before(&dbctx).await?;
        }
        let snapshot = self.snapshot(items).await?;
        self.db.with_context(&dbctx).update(items).await?;
        let after: DriverResult<()> = async {
            for item in items.iter_mut() {
                item.update_after(&dbctx).await?;
            }
            self.service.update_after(ctx, items).await?;
            Ok(())
        }
        .await;
        match after {
            Ok(()) => Ok(()),
            Err(e) => self.undo(ctx, &snapshot, e).await,
        }
    }

    /// Runs the partial update stages on the already-merged `items`, whose stored versions are
    /// `olds`.
    pub(super) async fn update_partial_all(
        &self,
        ctx: &ServiceContext,
        items: &mut [M],
        olds: &[M],
    ) -> DriverResult<()> {
        let dbctx = ctx.database_context();
        Self::carry_over(ctx, items, olds);
        self.service.update_partial_before(ctx, items).await?;
        for item in items.iter_mut() {
            item.update_partial_before(&dbctx).await?;
        }
        let snapshot = self.snapshot(items).await?;
        self.db.with_context(&dbctx).update(items).await?;
        let after: DriverResult<()> = async {
            for item in items.iter_mut() {
                item.update_partial_after(&dbctx).await?;
            }
            self.service.update_partial_after(ctx, items).await?;
            Ok(())
        }
        .await;
        match after {
            Ok(()) => Ok(()),
            Err(e) => self.undo(ctx, &snapshot, e).await,
        }
    }

    /// Replaces the record identified by `id` with `item` and returns the stored record.
    ///
    /// The creation time and creator of the stored record are preserved.
    pub async fn update(self, ctx: &ServiceContext, id: &str, mut item: M) -> DriverResult<M> {
        let request = to_json(&item);
        let old = self.read_back(id).await?;
        self.update_all(ctx, std::slice::from_mut(&mut item), std::slice::from_ref(&old)).await?;
        ctx.logger().debug(format_args!("Updated {}", id));

        let params = AuditParams {
            record_id: id.to_owned(),
            record: to_json(&item),
            request,
            old_record: to_json(&old),
            new_record: to_json(&item),
            ..Default::default()
        };
        self.audit(ctx, params).await?;
        Ok(item)
    }

    /// Applies the non-zero fields of `patch` to the record identified by `id` and returns the
    /// merged record.
    pub async fn update_partial(
        self,
        ctx: &ServiceContext,
        id: &str,
        patch: Value,
    ) -> DriverResult<M> {
        let old = self.read_back(id).await?;
        let mut item = merge(&old, &patch)?;
        self.update_partial_all(ctx, std::slice::from_mut(&mut item), std::slice::from_ref(&old))
            .await?;
        ctx.logger().debug(format_args!("Patched {}", id));

        let params = AuditParams {
            record_id: id.to_owned(),
            record: to_json(&item),
            request: Some(patch),
            old_record: to_json(&old),
            new_record: to_json(&item),
            ..Default::default()
        };
        self.audit(ctx, params).await?;
        Ok(item)
    }
}
