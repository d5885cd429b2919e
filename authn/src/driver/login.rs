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

//! Extends the driver with the `login` method.

use crate::driver::AuthnDriver;
use crate::model::{Fingerprint, Password, Session, Tokens, Username};
use log::{info, warn};
use restforge_core::db::DbError;
use restforge_core::driver::DriverResult;
use restforge_core::model::timestamp;
use serde_json::Value;

impl AuthnDriver {
    /// Marks the current time as the last login of `user_id`.  Accounts that only exist in the
    /// authenticator have no `User` record to update.
    async fn touch_last_login(&self, user_id: &str) -> DriverResult<()> {
        let now = self.clock.now_utc();
        let value = Value::String(timestamp::format(now));
        match self.users_db().update_by_id(user_id, "last_login", value).await {
            Ok(()) => Ok(()),
            Err(DbError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Marks a user as logged in from the device described by `user_agent` and returns a fresh
    /// pair of tokens.  Any previous session of the user is replaced.
    pub async fn login(
        self,
        username: Username,
        password: Password,
        user_agent: &str,
    ) -> DriverResult<Tokens> {
        let identity = self.authenticator.authenticate(&username, password).await?;

        let tokens = self.tokens.gen_tokens(&identity.user_id, &identity.username)?;
        if !self.tokens.is_none_expire_username(&identity.username) {
            let session = Session {
                access_token: tokens.access_token.clone(),
                refresh_token: tokens.refresh_token.clone(),
                ..Session::new(
                    &identity.user_id,
                    &identity.username,
                    Fingerprint::parse(user_agent),
                )
            };
            self.sessions.set(&identity.user_id, session).await?;
        }

        if let Err(e) = self.touch_last_login(&identity.user_id).await {
            warn!("Failed to record last login of {}: {}", identity.username, e);
        }
        info!("User {} logged in", identity.username);
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::testutils::*;
    use crate::model::{Password, User, Username};
    use restforge_core::driver::{AuthFailure, DriverError};

    #[tokio::test]
    async fn test_login_ok_creates_session() {
        let context = TestContext::setup().await;
        let user = context.create_user("alice", "s3cret").await;

        let tokens = context
            .driver()
            .login(Username::from("alice"), Password::from("s3cret"), UA_CHROME)
            .await
            .unwrap();
        assert!(!tokens.access_token.is_empty());
        assert!(!tokens.refresh_token.is_empty());

        let session = context.driver().sessions().get(&user.base.id).await.unwrap();
        assert_eq!(tokens.access_token, session.access_token);
        assert_eq!(tokens.refresh_token, session.refresh_token);
        assert_eq!("alice", session.username);
        assert_eq!("Windows 10.0", session.fingerprint.os);

        let mut stored = User::default();
        context.driver().users_db().get(&mut stored, &user.base.id, &mut vec![]).await.unwrap();
        assert_eq!(Some(context.now()), stored.last_login);
    }

    #[tokio::test]
    async fn test_login_normalizes_username() {
        let context = TestContext::setup().await;
        context.create_user("alice", "s3cret").await;

        context
            .driver()
            .login(Username::new("ALICE").unwrap(), Password::from("s3cret"), UA_CHROME)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_replaces_previous_session() {
        let context = TestContext::setup().await;
        let user = context.create_user("alice", "s3cret").await;

        let first = context.login("alice", "s3cret", UA_CHROME).await;
        context.advance_secs(1);
        let second = context.login("alice", "s3cret", UA_FIREFOX).await;
        assert_ne!(first, second);

        let session = context.driver().sessions().get(&user.base.id).await.unwrap();
        assert_eq!(second.access_token, session.access_token);
        assert_eq!("Gecko", session.fingerprint.engine_name);
    }

    #[tokio::test]
    async fn test_login_bad_password() {
        let context = TestContext::setup().await;
        context.create_user("alice", "s3cret").await;

        match context
            .driver()
            .login(Username::from("alice"), Password::from("wrong"), UA_CHROME)
            .await
        {
            Err(DriverError::Unauthorized(AuthFailure::InvalidLogin, _)) => (),
            e => panic!("{:?}", e),
        }
    }

    #[tokio::test]
    async fn test_login_unknown_user() {
        let context = TestContext::setup().await;

        match context
            .driver()
            .login(Username::from("nobody"), Password::from("s3cret"), UA_CHROME)
            .await
        {
            Err(DriverError::Unauthorized(AuthFailure::InvalidLogin, _)) => (),
            e => panic!("{:?}", e),
        }
    }

    #[tokio::test]
    async fn test_login_none_expire_user_skips_session() {
        let context = TestContext::setup_none_expire("forever").await;
        let user = context.create_user("root", "s3cret").await;

        let tokens = context.login("root", "s3cret", UA_CHROME).await;
        assert_eq!("forever", tokens.access_token);
        assert_eq!("", tokens.refresh_token);
        assert_eq!(None, context.driver().sessions().get(&user.base.id).await);
    }
}
