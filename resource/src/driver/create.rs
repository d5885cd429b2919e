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

//! Creation of records.

use crate::driver::{Resource, to_json};
use crate::service::ServiceContext;
use restforge_audit::model::AuditParams;
use restforge_core::driver::DriverResult;
use restforge_core::model::Model;

impl<M: Model> Resource<M> {
    /// Runs the creation stages on `items`, which are stamped as created by the caller.
    ///
    /// The inserted rows are removed again if the after hooks fail.
    pub(super) async fn create_all(
        &self,
        ctx: &ServiceContext,
        items: &mut [M],
    ) -> DriverResult<()> {
        let dbctx = ctx.database_context();
        for item in items.iter_mut() {
            item.set_created_by(ctx.username());
            item.set_updated_by(ctx.username());
        }

        self.service.create_before(ctx, items).await?;
        for item in items.iter_mut() {
            item.create_before(&dbctx).await?;
            item.set_id(None);
        }
        let snapshot = self.snapshot(items).await?;
        self.db.with_context(&dbctx).with_expand(&M::expands(), None).create(items).await?;
        let after: DriverResult<()> = async {
            for item in items.iter_mut() {
                item.create_after(&dbctx).await?;
            }
            self.service.create_after(ctx, items).await?;
            Ok(())
        }
        .await;
        match after {
            Ok(()) => Ok(()),
            Err(e) => self.undo(ctx, &snapshot, e).await,
        }
    }

    /// Creates `item` and returns it as stored, with its relations loaded.
    pub async fn create(self, ctx: &ServiceContext, mut item: M) -> DriverResult<M> {
        let request = to_json(&item);
        self.create_all(ctx, std::slice::from_mut(&mut item)).await?;
        ctx.logger().debug(format_args!("Created {}", item.id()));

        let params = AuditParams {
            record_id: item.id().to_owned(),
            record: to_json(&item),
            request,
            new_record: to_json(&item),
            ..Default::default()
        };
        self.audit(ctx, params).await?;
        Ok(item)
    }
}
