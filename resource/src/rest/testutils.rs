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

//! Test utilities for the REST interface of resources.

use crate::driver::testutils::TestContext as DriverTestContext;
use crate::rest::router;
use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use restforge_core::context::{RequestContext, trace};

/// Marks every request as coming from the `tester` user, as the driver test context does.
pub async fn fake_login(mut request: Request, next: Next) -> Response {
    let extensions = request.extensions_mut();
    let mut context = extensions.get::<RequestContext>().cloned().unwrap_or_default();
    context.user_id = "tester-id".to_owned();
    context.username = "tester".to_owned();
    extensions.insert(context);
    next.run(request).await
}

/// State of a running test of the REST interface.
pub struct TestContext {
    /// Driver-level context that owns the database and the clock.
    inner: DriverTestContext,

    /// Router serving the notes resource under `/api/notes`.
    app: Router,
}

impl TestContext {
    /// Sets up the notes resource over an in-memory database.
    pub async fn setup() -> Self {
        let inner = DriverTestContext::setup().await;
        let app = Router::new()
            .nest("/api/notes", router(inner.resource()))
            .layer(middleware::from_fn(fake_login))
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
