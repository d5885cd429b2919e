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

//! Utilities to help testing services that integrate with the `authn` REST features.

use crate::driver::testutils::TestContext as DriverTestContext;
use crate::model::{Password, Tokens, Username};
use crate::rest::{LoginRequest, app};
use axum::Router;
use axum::middleware;
use http::header;
use restforge_core::context::trace;
use restforge_core::rest::testutils::OneShotBuilder;

/// Logs `username` in with `password` from the `user_agent` device and returns its tokens.
///
/// The `app` is a REST router serving the `authn` interface under the `base` prefix.
pub async fn do_test_login(
    app: Router,
    base: &str,
    username: &str,
    password: &str,
    user_agent: &str,
) -> Tokens {
    let request = LoginRequest {
        username: Username::new(username).unwrap(),
        password: Password::new(password).unwrap(),
    };
    OneShotBuilder::new(app, (http::Method::POST, format!("{}/login", base)))
        .with_header(header::USER_AGENT, user_agent)
        .send_json(request)
        .await
        .expect_data::<Tokens>()
        .await
}

/// State of a running test.
pub struct TestContext {
    /// Driver-level context that owns the database and the clock.
    inner: DriverTestContext,

    /// Router serving the authentication endpoints under `/api/test`.
    app: Router,
}

impl TestContext {
    /// Sets up the authentication endpoints over an in-memory database.
    pub async fn setup() -> Self {
        let inner = DriverTestContext::setup().await;
        let app = Router::new()
            .nest("/api/test", app(inner.driver()))
            .layer(middleware::from_fn(trace));
        Self { inner, app }
    }

    /// Returns the driver-level test context.
    pub fn inner(&self) -> &DriverTestContext {
        &self.inner
    }

    /// Gets a clone of the app router.
    pub fn app(&self) -> Router {
        self.app.clone()
    }
}
