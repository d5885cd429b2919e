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

//! Record types of the sample service that are not provided by the framework.

use async_trait::async_trait;
use restforge_authn::model::User;
use restforge_core::context::DatabaseContext;
use restforge_core::model::{Base, Model, ModelError, ModelResult, Relation};
use serde::{Deserialize, Serialize};

/// A named collection of users, owned by one of them.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Group {
    /// Common fields.
    #[serde(flatten)]
    pub base: Base,

    /// Unique display name.
    pub name: String,

    /// Free-form description.
    pub description: String,

    /// Identifiers of the users in the group.
    pub members: Vec<String>,

    /// Identifier of the user that manages the group.
    pub owner_id: String,

    /// Expanded owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Box<User>>,
}

impl Group {
    /// Trims the name and sorts the members, dropping duplicates.
    fn normalize(&mut self) -> ModelResult<()> {
        self.name = self.name.trim().to_owned();
        if self.name.is_empty() {
            return Err(ModelError("Group name cannot be empty".to_owned()));
        }
        self.members.retain(|m| !m.is_empty());
        self.members.sort();
        self.members.dedup();
        Ok(())
    }
}

#[async_trait]
impl Model for Group {
    fn table_name() -> &'static str {
        "groups"
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::belongs_to::<User>("owner", "owner_id")]
    }

    async fn create_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        self.normalize()
    }

    async fn update_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        self.normalize()
    }

    async fn update_partial_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        self.normalize()
    }
}
