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

//! API to terminate the session of the caller.

use crate::driver::AuthnDriver;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use restforge_core::context::RequestContext;
use restforge_core::rest::envelope::success;
use restforge_core::rest::{EmptyBody, RestError};

/// POST handler for this API.
pub(crate) async fn handler(
    State(driver): State<AuthnDriver>,
    ctx: RequestContext,
    _: EmptyBody,
) -> Result<Response, RestError> {
    driver.logout(&ctx.user_id).await?;
    Ok(success(StatusCode::OK, ()))
}

#[cfg(test)]
mod tests {
    use crate::driver::testutils::UA_CHROME;
    use crate::rest::testutils::*;
    use axum::http::{self, header};
    use restforge_core::rest::Code;
    use restforge_core::rest::testutils::OneShotBuilder;

    fn route() -> (http::Method, String) {
        (http::Method::POST, "/api/test/logout".to_owned())
    }

    #[tokio::test]
    async fn test_ok() {
        let context = TestContext::setup().await;
        let user = context.inner().create_user("alice", "s3cret").await;
        let tokens = context.inner().login("alice", "s3cret", UA_CHROME).await;

        OneShotBuilder::new(context.app(), route())
            .with_bearer_auth(&tokens.access_token)
            .with_header(header::USER_AGENT, UA_CHROME)
            .send_empty()
            .await
            .expect_code(Code::SUCCESS)
            .await;

        assert_eq!(None, context.inner().session(&user.base.id).await);
        assert_eq!(0, context.inner().count_sessions().await);
    }

    #[tokio::test]
    async fn test_requires_login() {
        let context = TestContext::setup().await;

        OneShotBuilder::new(context.app(), route())
            .send_empty()
            .await
            .expect_status(http::StatusCode::UNAUTHORIZED)
            .expect_code(Code::NEED_LOGIN)
            .await;
    }

    #[tokio::test]
    async fn test_payload_must_be_empty() {
        let context = TestContext::setup().await;
        context.inner().create_user("alice", "s3cret").await;
        let tokens = context.inner().login("alice", "s3cret", UA_CHROME).await;

        OneShotBuilder::new(context.app(), route())
            .with_bearer_auth(&tokens.access_token)
            .with_header(header::USER_AGENT, UA_CHROME)
            .send_text("should not be here")
            .await
            .expect_status(http::StatusCode::PAYLOAD_TOO_LARGE)
            .expect_error(Code::TOO_LARGE, "should be empty")
            .await;
    }
}
