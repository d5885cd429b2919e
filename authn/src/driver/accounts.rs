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

//! Extends the driver with account management.

use crate::driver::{AuthnDriver, Identity};
use crate::model::{Credential, Password, User};
use log::info;
use restforge_core::context::DatabaseContext;
use restforge_core::db::DbError;
use restforge_core::driver::{DriverError, DriverResult};
use restforge_core::model::{Base, Model};
use serde_json::Value;

impl AuthnDriver {
    /// Creates the user described by `user`, whose `password` field must hold the initial
    /// password, and returns it as stored.
    pub async fn create_account(self, mut user: User) -> DriverResult<User> {
        let password = Password::new(std::mem::take(&mut user.password))?;
        user.create_before(&DatabaseContext::default()).await?;
        let mut users = [user];
        self.users_db().create(&mut users).await?;
        let [user] = users;
        self.set_password(&user, password).await?;
        info!("Created account {}", user.username);
        Ok(user)
    }

    /// Sets the password of the existing `user`, replacing any previous one.
    pub async fn set_password(&self, user: &User, password: Password) -> DriverResult<()> {
        if user.id().is_empty() {
            return Err(DriverError::InvalidInput("User has no identifier".to_owned()));
        }
        let hash = password.hash()?;
        let mut credentials = [Credential {
            base: Base { id: user.id().to_owned(), ..Default::default() },
            username: user.username.clone(),
            hash,
        }];
        self.credentials_db().update(&mut credentials).await?;
        Ok(())
    }

    /// Propagates a username change of `user` to its credentials.
    pub async fn rename_credentials(&self, user: &User) -> DriverResult<()> {
        let value = Value::String(user.username.clone());
        match self.credentials_db().update_by_id(user.id(), "username", value).await {
            Ok(()) | Err(DbError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the credentials and the sessions of the users identified by `ids`.
    pub async fn remove_credentials(&self, ids: &[String]) -> DriverResult<()> {
        let credentials = ids
            .iter()
            .map(|id| Credential {
                base: Base { id: id.clone(), ..Default::default() },
                ..Default::default()
            })
            .collect::<Vec<_>>();
        self.credentials_db().with_purge(true).delete(&credentials).await?;
        for id in ids {
            self.sessions.remove(id).await?;
        }
        Ok(())
    }

    /// Returns the user behind `identity`.
    ///
    /// Principals that only exist in configuration, like the owner of the none-expire token, get
    /// a synthesized record.
    pub async fn me(self, identity: &Identity) -> DriverResult<User> {
        let mut user = User::default();
        self.users_db().get(&mut user, &identity.user_id, &mut vec![]).await?;
        if user.id().is_empty() {
            if self.tokens.is_none_expire_username(&identity.username) {
                return Ok(User {
                    base: Base { id: identity.user_id.clone(), ..Default::default() },
                    username: identity.username.clone(),
                    ..Default::default()
                });
            }
            return Err(DriverError::NotFound(format!("User {} not found", identity.username)));
        }
        Ok(user)
    }
}
