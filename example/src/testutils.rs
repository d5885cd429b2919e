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

//! Test utilities for the sample service.

use crate::register;
use axum::Router;
use http::{Method, StatusCode, header};
use restforge_audit::model::AuditLog;
use restforge_authn::driver::testutils::UA_CHROME;
use restforge_authn::model::{Tokens, User};
use restforge_authn::rest::testutils::do_test_login;
use restforge_core::clocks::Clock;
use restforge_core::clocks::testutils::SettableClock;
use restforge_core::config::Config;
use restforge_core::database::Database;
use restforge_core::db::Db;
use restforge_core::rest::testutils::OneShotBuilder;
use restforge_resource::App;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use time::macros::datetime;

/// Token that authenticates requests as `root` without logging in.
pub(crate) const ROOT_TOKEN: &str = "root-token";

/// Merges the sections in `overrides` into `config`, field by field.
fn overlay(config: &mut Value, overrides: Value) {
    if let (Some(config), Value::Object(overrides)) = (config.as_object_mut(), overrides) {
        for (section, fields) in overrides {
            let target = config.entry(section).or_insert_with(|| json!({}));
            if let (Some(target), Value::Object(fields)) = (target.as_object_mut(), fields) {
                target.extend(fields);
            }
        }
    }
}

/// State of a running test of the whole service.
pub(crate) struct TestContext {
    /// The application under test.
    app: App,

    /// Router of the application.
    router: Router,

    /// Database backing the application.
    db: Arc<dyn Db + Send + Sync>,

    /// Clock used by the application.
    clock: Arc<SettableClock>,
}

impl TestContext {
    /// Sets up the service over an in-memory database with synchronous auditing.
    pub(crate) async fn setup() -> Self {
        Self::setup_with(json!({})).await
    }

    /// Sets up the service like `setup` but with the configuration sections in `overrides`.
    pub(crate) async fn setup_with(overrides: Value) -> Self {
        let mut config = json!({
            "auth": {"none_expire_token": ROOT_TOKEN},
            "audit": {"async_write": false},
        });
        overlay(&mut config, overrides);

        let db: Arc<dyn Db + Send + Sync> =
            Arc::from(restforge_core::db::sqlite::testutils::setup().await);
        let clock = Arc::from(SettableClock::new(datetime!(2023-06-01 10:00:00 UTC)));
        let mut app =
            App::with_db(Config::from_value(config).unwrap(), db.clone(), clock.clone()).unwrap();
        register(&mut app);
        app.init().await.unwrap();
        let router = app.router();
        Self { app, router, db, clock }
    }

    /// Returns the application under test.
    pub(crate) fn app(&self) -> &App {
        &self.app
    }

    /// Gets a clone of the app router.
    pub(crate) fn router(&self) -> Router {
        self.router.clone()
    }

    /// Moves the clock `secs` seconds forward.
    pub(crate) fn advance_secs(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    /// Starts a request to `uri` authenticated as `root`.
    pub(crate) fn root<U: AsRef<str>>(&self, method: Method, uri: U) -> OneShotBuilder {
        OneShotBuilder::new(self.router(), (method, uri)).with_bearer_auth(ROOT_TOKEN)
    }

    /// Starts a request to `uri` authenticated with the access token in `tokens`.
    pub(crate) fn as_user<U: AsRef<str>>(
        &self,
        tokens: &Tokens,
        method: Method,
        uri: U,
    ) -> OneShotBuilder {
        OneShotBuilder::new(self.router(), (method, uri))
            .with_bearer_auth(&tokens.access_token)
            .with_header(header::USER_AGENT, UA_CHROME)
    }

    /// Creates the user `username` through the API as `root`.
    pub(crate) async fn create_user(&self, username: &str, password: &str) -> User {
        self.root(Method::POST, "/api/users")
            .send_json(json!({"username": username, "password": password}))
            .await
            .expect_status(StatusCode::CREATED)
            .expect_data::<User>()
            .await
    }

    /// Logs `username` in from Chrome.
    pub(crate) async fn login(&self, username: &str, password: &str) -> Tokens {
        do_test_login(self.router(), "/api", username, password, UA_CHROME).await
    }

    /// Inserts `users` straight into the database, bypassing the API.
    pub(crate) async fn insert_users(&self, mut users: Vec<User>) {
        self.app.database::<User>().create(&mut users).await.unwrap();
    }

    /// Returns all persisted audit entries, oldest first.
    pub(crate) async fn audit_logs(&self) -> Vec<AuditLog> {
        let dyn_clock: Arc<dyn Clock + Send + Sync> = self.clock.clone();
        let mut logs = vec![];
        Database::<AuditLog>::new(self.db.clone(), dyn_clock)
            .with_order("created_at ASC")
            .list(&mut logs, &mut vec![])
            .await
            .unwrap();
        logs
    }
}
