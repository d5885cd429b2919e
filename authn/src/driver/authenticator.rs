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

//! Verification of login credentials.

use crate::driver::Identity;
use crate::model::{Credential, Password, Username};
use async_trait::async_trait;
use restforge_core::database::Database;
use restforge_core::db::DbError;
use restforge_core::driver::{AuthFailure, DriverError, DriverResult};

/// Returns the error for a username/password pair that does not match.
pub(crate) fn invalid_login() -> DriverError {
    DriverError::Unauthorized(AuthFailure::InvalidLogin, "Invalid username or password".to_owned())
}

/// Verifies a username/password pair and resolves it to a user.
#[async_trait]
pub trait Authenticator {
    /// Returns the identity of `username` if `password` is correct.  The returned identity does
    /// not have a session yet.
    async fn authenticate(&self, username: &Username, password: Password) -> DriverResult<Identity>;
}

/// Authenticator that checks passwords against the bcrypt hashes in the `credentials` table.
#[derive(Clone)]
pub struct DbAuthenticator {
    /// Storage for password hashes.
    db: Database<Credential>,
}

impl DbAuthenticator {
    /// Creates a new authenticator backed by `db`.
    pub fn new(db: Database<Credential>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Authenticator for DbAuthenticator {
    async fn authenticate(
        &self,
        username: &Username,
        password: Password,
    ) -> DriverResult<Identity> {
        let sample = Credential { username: username.as_str().to_owned(), ..Default::default() };
        let mut credential = Credential::default();
        match self.db.with_query(&sample, false).take(&mut credential).await {
            Ok(()) => (),
            Err(DbError::NotFound) => return Err(invalid_login()),
            Err(e) => return Err(e.into()),
        }

        if !password.verify(&credential.hash)? {
            return Err(invalid_login());
        }

        Ok(Identity {
            user_id: credential.base.id,
            username: credential.username,
            session_id: String::new(),
        })
    }
}
