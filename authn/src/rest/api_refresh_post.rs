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

//! API to rotate the tokens of a session.

use crate::driver::AuthnDriver;
use crate::rest::get_user_agent;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use restforge_core::rest::envelope::success;
use restforge_core::rest::{JsonBody, RestError};
use serde::{Deserialize, Serialize};

/// Message sent to the server to rotate tokens.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshRequest {
    /// The access token of the session, which may have expired.
    pub access_token: String,

    /// The refresh token of the session.
    pub refresh_token: String,
}

/// POST handler for this API.
pub(crate) async fn handler(
    State(driver): State<AuthnDriver>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<RefreshRequest>,
) -> Result<Response, RestError> {
    let user_agent = get_user_agent(&headers);
    let tokens =
        driver.refresh(&request.access_token, &request.refresh_token, &user_agent).await?;
    Ok(success(StatusCode::OK, tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testutils::{UA_CHROME, UA_FIREFOX};
    use crate::model::Tokens;
    use crate::rest::testutils::*;
    use axum::http::{self, header};
    use restforge_core::rest::Code;
    use restforge_core::rest::testutils::OneShotBuilder;
    use restforge_core::test_payload_must_be_json;

    fn route() -> (http::Method, String) {
        (http::Method::POST, "/api/test/refresh".to_owned())
    }

    #[tokio::test]
    async fn test_ok() {
        let context = TestContext::setup().await;
        let user = context.inner().create_user("alice", "s3cret").await;
        let old = context.inner().login("alice", "s3cret", UA_CHROME).await;

        context.inner().advance_secs(60);
        let new = OneShotBuilder::new(context.app(), route())
            .with_header(header::USER_AGENT, UA_CHROME)
            .send_json(RefreshRequest {
                access_token: old.access_token.clone(),
                refresh_token: old.refresh_token.clone(),
            })
            .await
            .expect_data::<Tokens>()
            .await;
        assert_ne!(old, new);

        let session = context.inner().session(&user.base.id).await.unwrap();
        assert_eq!(new.refresh_token, session.refresh_token);
    }

    #[tokio::test]
    async fn test_other_device() {
        let context = TestContext::setup().await;
        context.inner().create_user("alice", "s3cret").await;
        let old = context.inner().login("alice", "s3cret", UA_CHROME).await;

        OneShotBuilder::new(context.app(), route())
            .with_header(header::USER_AGENT, UA_FIREFOX)
            .send_json(RefreshRequest {
                access_token: old.access_token.clone(),
                refresh_token: old.refresh_token.clone(),
            })
            .await
            .expect_status(http::StatusCode::UNAUTHORIZED)
            .expect_error(Code::INVALID_TOKEN, "another device")
            .await;
    }

    #[tokio::test]
    async fn test_garbage_tokens() {
        let context = TestContext::setup().await;

        OneShotBuilder::new(context.app(), route())
            .send_json(RefreshRequest {
                access_token: "a".to_owned(),
                refresh_token: "b".to_owned(),
            })
            .await
            .expect_status(http::StatusCode::UNAUTHORIZED)
            .expect_code(Code::INVALID_TOKEN)
            .await;
    }

    test_payload_must_be_json!(TestContext::setup().await.app(), route());
}
