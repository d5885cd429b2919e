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

//! Domain logic for user accounts.

use async_trait::async_trait;
use http::StatusCode;
use log::info;
use restforge_authn::driver::AuthnDriver;
use restforge_authn::model::{Password, User};
use restforge_core::driver::DriverError;
use restforge_core::model::Model;
use restforge_resource::{Service, ServiceContext, ServiceError, ServiceResult};

/// Keeps the credentials of the users in sync with their records.
///
/// Passwords are accepted in create and update requests but never stored in the user records:
/// they are hashed into the credentials owned by the authentication driver.
#[derive(Clone)]
pub struct UserService {
    /// Owner of the credentials and sessions.
    authn: AuthnDriver,
}

impl UserService {
    /// Creates the service on top of `authn`.
    pub fn new(authn: AuthnDriver) -> Self {
        Self { authn }
    }

    /// Moves the plain text password of `user`, if any, into its credentials.
    async fn store_password(&self, user: &mut User) -> ServiceResult<()> {
        if user.password.is_empty() {
            return Ok(());
        }
        let password =
            Password::new(std::mem::take(&mut user.password)).map_err(DriverError::from)?;
        self.authn.set_password(user, password).await?;
        Ok(())
    }

    /// Propagates username and password changes of `items` to their credentials.
    async fn sync(&self, ctx: &ServiceContext, items: &mut [User]) -> ServiceResult<()> {
        for user in items.iter_mut() {
            self.authn.rename_credentials(user).await?;
            if !user.password.is_empty() {
                ctx.logger().info(format_args!("Changing password of {}", user.username));
            }
            self.store_password(user).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Service<User> for UserService {
    async fn create_before(&self, _ctx: &ServiceContext, items: &mut [User]) -> ServiceResult<()> {
        match items.iter().find(|u| u.password.is_empty()) {
            Some(user) => Err(ServiceError::with_status(
                StatusCode::BAD_REQUEST,
                format!("User {} needs a password", user.username),
            )),
            None => Ok(()),
        }
    }

    async fn create_after(&self, _ctx: &ServiceContext, items: &mut [User]) -> ServiceResult<()> {
        for user in items.iter_mut() {
            self.store_password(user).await?;
            info!("Created account {}", user.username);
        }
        Ok(())
    }

    async fn update_after(&self, ctx: &ServiceContext, items: &mut [User]) -> ServiceResult<()> {
        self.sync(ctx, items).await
    }

    async fn update_partial_after(
        &self,
        ctx: &ServiceContext,
        items: &mut [User],
    ) -> ServiceResult<()> {
        self.sync(ctx, items).await
    }

    async fn delete_after(&self, _ctx: &ServiceContext, items: &mut [User]) -> ServiceResult<()> {
        let ids = items.iter().map(|u| u.id().to_owned()).collect::<Vec<String>>();
        self.authn.remove_credentials(&ids).await?;
        Ok(())
    }
}
