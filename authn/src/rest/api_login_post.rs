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

//! API to open a session for an existing user.

use crate::driver::AuthnDriver;
use crate::model::{Password, Username};
use crate::rest::get_user_agent;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use restforge_core::rest::envelope::success;
use restforge_core::rest::{JsonBody, RestError};
use serde::{Deserialize, Serialize};

/// Message sent to the server to log in.
#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    /// Name of the user logging in.
    pub username: Username,

    /// Password of the user logging in.
    pub password: Password,
}

/// POST handler for this API.
pub(crate) async fn handler(
    State(driver): State<AuthnDriver>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<Response, RestError> {
    let user_agent = get_user_agent(&headers);
    let tokens = driver.login(request.username, request.password, &user_agent).await?;
    Ok(success(StatusCode::OK, tokens))
}
