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

//! API to query the account of the caller.

use crate::driver::{AuthnDriver, Identity};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use restforge_core::context::RequestContext;
use restforge_core::rest::envelope::success;
use restforge_core::rest::{EmptyBody, RestError};

/// GET handler for this API.
pub(crate) async fn handler(
    State(driver): State<AuthnDriver>,
    ctx: RequestContext,
    _: EmptyBody,
) -> Result<Response, RestError> {
    let identity =
        Identity { user_id: ctx.user_id, username: ctx.username, session_id: ctx.session_id };
    let user = driver.me(&identity).await?;
    Ok(success(StatusCode::OK, user))
}

#[cfg(test)]
mod tests {
    use crate::driver::testutils::UA_CHROME;
    use crate::model::User;
    use crate::rest::testutils::*;
    use axum::http::{self, header};
    use restforge_core::rest::testutils::OneShotBuilder;

    fn route() -> (http::Method, String) {
        (http::Method::GET, "/api/test/me".to_owned())
    }

    #[tokio::test]
    async fn test_ok() {
        let context = TestContext::setup().await;
        let user = context.inner().create_user("alice", "s3cret").await;
        let tokens = context.inner().login("alice", "s3cret", UA_CHROME).await;

        let envelope = OneShotBuilder::new(context.app(), route())
            .with_bearer_auth(&tokens.access_token)
            .with_header(header::USER_AGENT, UA_CHROME)
            .send_empty()
            .await
            .expect_envelope()
            .await;
        assert_eq!(None, envelope.data.get("password"));

        let me: User = serde_json::from_value(envelope.data).unwrap();
        assert_eq!(user.base.id, me.base.id);
        assert_eq!("alice@example.com", me.email);
        assert!(me.last_login.is_some());
    }
}
