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

//! Domain logic for groups.

use async_trait::async_trait;
use http::StatusCode;
use restforge_resource::{Service, ServiceContext, ServiceError, ServiceResult};

use crate::model::Group;

/// Assigns owners to new groups and keeps them from being orphaned.
#[derive(Clone, Copy, Debug, Default)]
pub struct GroupService;

#[async_trait]
impl Service<Group> for GroupService {
    async fn create_before(&self, ctx: &ServiceContext, items: &mut [Group]) -> ServiceResult<()> {
        for group in items.iter_mut().filter(|g| g.owner_id.is_empty()) {
            group.owner_id = ctx.request.user_id.clone();
        }
        Ok(())
    }

    async fn update_before(&self, _ctx: &ServiceContext, items: &mut [Group]) -> ServiceResult<()> {
        match items.iter().find(|g| g.owner_id.is_empty()) {
            Some(group) => Err(ServiceError::with_status(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Group {} needs an owner", group.name),
            )),
            None => Ok(()),
        }
    }
}
