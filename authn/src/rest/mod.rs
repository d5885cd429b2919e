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

//! REST interface for token-based authentication.

use crate::driver::AuthnDriver;
use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use restforge_core::context::RequestContext;
use restforge_core::rest::RestError;

mod api_login_post;
mod api_logout_post;
mod api_me_get;
mod api_refresh_post;
mod httputils;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use api_login_post::LoginRequest;
pub use api_refresh_post::RefreshRequest;
pub use httputils::{get_bearer_auth, get_user_agent, has_bearer_auth};

/// Authenticates the bearer token of `request` and records the principal in its context.
async fn authenticate(driver: &AuthnDriver, request: &mut Request) -> Result<(), RestError> {
    let token = get_bearer_auth(request.headers())?;
    let user_agent = get_user_agent(request.headers());
    let identity = driver.verify(&token, &user_agent).await?;

    let extensions = request.extensions_mut();
    let mut context = extensions.get::<RequestContext>().cloned().unwrap_or_default();
    context.user_id = identity.user_id;
    context.username = identity.username;
    context.session_id = identity.session_id;
    extensions.insert(context);
    Ok(())
}

/// Middleware that rejects requests without a valid bearer token.
///
/// On success, the `user_id`, `username` and `session_id` of the `RequestContext` of the request
/// identify the caller.
pub async fn require_auth(
    State(driver): State<AuthnDriver>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&driver, &mut request).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// Creates the router for the authentication endpoints.
///
/// `/login` and `/refresh` are public.  `/logout` and `/me` require a bearer token.
pub fn app(driver: AuthnDriver) -> Router {
    use axum::routing::{get, post};

    let guarded = Router::new()
        .route("/logout", post(api_logout_post::handler))
        .route("/me", get(api_me_get::handler))
        .route_layer(middleware::from_fn_with_state(driver.clone(), require_auth));

    Router::new()
        .route("/login", post(api_login_post::handler))
        .route("/refresh", post(api_refresh_post::handler))
        .merge(guarded)
        .with_state(driver)
}
