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

//! Authorization middleware.

use crate::driver::Enforcer;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use log::info;
use restforge_core::context::RequestContext;
use restforge_core::rest::{Code, RestError};

/// Middleware that rejects requests whose caller is not allowed to invoke the requested method on
/// the requested path.
///
/// Must run after authentication so that the `RequestContext` of the request identifies the
/// caller.  The path is the one seen by the router the middleware is attached to, so prefixes
/// stripped by `nest` do not take part in the decision.
pub async fn authorize(State(enforcer): State<Enforcer>, request: Request, next: Next) -> Response {
    let ctx = request.extensions().get::<RequestContext>().cloned().unwrap_or_default();
    if !ctx.is_authenticated() {
        let message = "Not logged in".to_owned();
        return RestError::Unauthorized { code: Code::NEED_LOGIN, message }.into_response();
    }

    let object = request.uri().path().to_owned();
    let action = request.method().as_str().to_owned();
    if !enforcer.enforce_user(&ctx.user_id, &ctx.username, &object, &action) {
        info!("Denied {} {} to user {}", action, object, ctx.username);
        return RestError::Forbidden(format!("{} {}", action, object)).into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Policy;
    use axum::Router;
    use axum::middleware;
    use axum::routing::get;
    use http::{Method, StatusCode};
    use restforge_core::clocks::SystemClock;
    use restforge_core::database::Database;
    use restforge_core::rest::testutils::OneShotBuilder;
    use std::sync::Arc;

    /// Fakes an authenticated caller as the auth middleware would.
    async fn fake_login(mut request: Request, next: Next) -> Response {
        let user = request
            .headers()
            .get("x-test-user")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let user_id = format!("{}-id", user);
        let ctx = RequestContext { user_id, username: user, ..Default::default() };
        if !ctx.username.is_empty() {
            request.extensions_mut().insert(ctx);
        }
        next.run(request).await
    }

    /// Creates an app that serves `/users` guarded by an enforcer with no policies.
    async fn setup() -> (Enforcer, Router) {
        let db = Arc::from(restforge_core::db::sqlite::testutils::setup().await);
        let clock = Arc::from(SystemClock::default());
        let enforcer = Enforcer::new(Database::<Policy>::new(db, clock));
        enforcer.init(&[]).await.unwrap();

        let app = Router::new()
            .route("/users", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(enforcer.clone(), authorize))
            .layer(middleware::from_fn(fake_login));
        (enforcer, app)
    }

    #[tokio::test]
    async fn test_deny_then_allow() {
        let (enforcer, app) = setup().await;

        OneShotBuilder::new(app.clone(), (Method::GET, "/users"))
            .with_header("x-test-user", "bob")
            .send_empty()
            .await
            .expect_status(StatusCode::FORBIDDEN)
            .expect_error(Code::FORBIDDEN, "Access denied: GET /users")
            .await;

        enforcer.add_policy("bob-id", "/users", "GET").await.unwrap();
        let response = OneShotBuilder::new(app, (Method::GET, "/users"))
            .with_header("x-test-user", "bob")
            .send_empty()
            .await
            .take_body_as_bytes()
            .await;
        assert_eq!(b"ok".as_slice(), response.as_ref());
    }

    #[tokio::test]
    async fn test_root_bypass() {
        let (_enforcer, app) = setup().await;

        OneShotBuilder::new(app, (Method::GET, "/users"))
            .with_header("x-test-user", "root")
            .send_empty()
            .await
            .take_body_as_bytes()
            .await;
    }

    #[tokio::test]
    async fn test_anonymous() {
        let (_enforcer, app) = setup().await;

        OneShotBuilder::new(app, (Method::GET, "/users"))
            .send_empty()
            .await
            .expect_status(StatusCode::UNAUTHORIZED)
            .expect_code(Code::NEED_LOGIN)
            .await;
    }
}
