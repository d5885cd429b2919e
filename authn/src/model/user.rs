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

//! The `User` and `Credential` data types.

use crate::model::{HashedPassword, Username};
use async_trait::async_trait;
use restforge_core::context::DatabaseContext;
use restforge_core::model::{Base, Model, ModelResult, timestamp};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// An account that can log into the service.
///
/// The `password` field is write-only: it is accepted in requests so that services can turn it
/// into a `Credential`, but it is never serialized and thus never persisted nor returned.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct User {
    /// Common fields.
    #[serde(flatten)]
    pub base: Base,

    /// Login name of the user.
    pub username: String,

    /// Display name of the user.
    pub nickname: String,

    /// Contact email of the user.
    pub email: String,

    /// Plain text password supplied in a request.
    #[serde(skip_serializing)]
    pub password: String,

    /// Time of the most recent successful login.
    #[serde(with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub last_login: Option<OffsetDateTime>,
}

impl User {
    /// Validates and normalizes the username.
    fn check_username(&mut self) -> ModelResult<()> {
        self.username = Username::new(self.username.as_str())?.as_str().to_owned();
        Ok(())
    }
}

#[async_trait]
impl Model for User {
    fn table_name() -> &'static str {
        "users"
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    async fn create_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        self.check_username()
    }

    async fn update_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        self.check_username()
    }

    async fn update_partial_before(&mut self, _ctx: &DatabaseContext) -> ModelResult<()> {
        self.check_username()
    }
}

/// The password hash of a user, stored apart from the `User` record so that it never leaves the
/// service.  Its identifier is the identifier of the user it belongs to.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Credential {
    /// Common fields.
    #[serde(flatten)]
    pub base: Base,

    /// Login name of the user, used to look the credential up.
    pub username: String,

    /// Password hash.
    pub hash: HashedPassword,
}

#[async_trait]
impl Model for Credential {
    fn table_name() -> &'static str {
        "credentials"
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}
