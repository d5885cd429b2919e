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

//! Utilities to help testing services that integrate with the `authn` features.

use crate::driver::{AuthOptions, AuthnDriver};
use crate::model::{Password, Session, Tokens, User, Username};
use restforge_core::clocks::Clock;
use restforge_core::clocks::testutils::SettableClock;
use restforge_core::db::Db;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;

/// User agent of a desktop Chrome browser.
pub const UA_CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// User agent of a desktop Firefox browser.
pub const UA_FIREFOX: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

/// State of a running test.
pub struct TestContext {
    /// Clock used by the driver, which tests can move.
    clock: Arc<SettableClock>,

    /// The driver to handle authentication flows.
    driver: AuthnDriver,
}

impl TestContext {
    /// Initializes the driver using an in-memory database and a settable clock.
    pub async fn setup() -> Self {
        Self::setup_opts(AuthOptions::default()).await
    }

    /// Initializes the driver so that `root` logs in with the never-expiring `token`.
    pub async fn setup_none_expire(token: &str) -> Self {
        Self::setup_opts(AuthOptions { none_expire_token: token.to_owned(), ..Default::default() })
            .await
    }

    /// Initializes the driver with `opts` using an in-memory database and a settable clock.
    pub async fn setup_opts(opts: AuthOptions) -> Self {
        let db = Arc::from(restforge_core::db::sqlite::testutils::setup().await);
        let clock = Arc::from(SettableClock::new(datetime!(2023-06-01 10:00:00 UTC)));
        Self::setup_with(opts, db, clock).await
    }

    /// Initializes the test context using the given already-initialized objects.
    pub async fn setup_with(
        opts: AuthOptions,
        db: Arc<dyn Db + Send + Sync>,
        clock: Arc<SettableClock>,
    ) -> Self {
        let driver = AuthnDriver::new(db, clock.clone(), Arc::from(opts));
        driver.init().await.unwrap();
        TestContext { clock, driver }
    }

    /// Gets a copy of the driver in this test context.
    pub fn driver(&self) -> AuthnDriver {
        self.driver.clone()
    }

    /// Returns the current time of the test clock.
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now_utc()
    }

    /// Moves the test clock `secs` seconds forward.
    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    /// Syntactic sugar to create a user with a password for testing purposes.
    pub async fn create_user(&self, username: &str, password: &str) -> User {
        let user = User {
            username: username.to_owned(),
            email: format!("{}@example.com", username.to_lowercase()),
            password: password.to_owned(),
            ..Default::default()
        };
        self.driver().create_account(user).await.unwrap()
    }

    /// Syntactic sugar to log an existing user in for testing purposes.
    pub async fn login(&self, username: &str, password: &str, user_agent: &str) -> Tokens {
        let username = Username::new(username).unwrap();
        let password = Password::new(password).unwrap();
        self.driver().login(username, password, user_agent).await.unwrap()
    }

    /// Counts the persisted session rows.
    pub async fn count_sessions(&self) -> i64 {
        self.driver.sessions_db().count().await.unwrap()
    }

    /// Returns the live session of `user_id`.
    pub async fn session(&self, user_id: &str) -> Option<Session> {
        self.driver.sessions().get(user_id).await
    }
}
