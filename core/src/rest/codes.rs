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

//! Response codes carried in the envelope and their mapping to HTTP statuses.
//!
//! A fixed table covers the codes known to the framework.  Applications can extend it, or
//! override entries, with `register`.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, RwLock};

/// A response code.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Code(pub i32);

impl Code {
    /// The request succeeded.
    pub const SUCCESS: Code = Code(0);

    /// A step of the request rejected it.
    pub const FAILURE: Code = Code(1);

    /// The request contains invalid parameters or an invalid body.
    pub const INVALID_PARAM: Code = Code(2);

    /// The requested record does not exist.
    pub const NOT_FOUND: Code = Code(3);

    /// The record conflicts with an existing one.
    pub const ALREADY_EXISTS: Code = Code(4);

    /// The request payload is too large.
    pub const TOO_LARGE: Code = Code(5);

    /// The route requires authentication and none was provided.
    pub const NEED_LOGIN: Code = Code(1000);

    /// The token is malformed, revoked or bound to another device.
    pub const INVALID_TOKEN: Code = Code(1001);

    /// The token has expired.
    pub const TOKEN_EXPIRED: Code = Code(1002);

    /// The username or password are incorrect.
    pub const INVALID_LOGIN: Code = Code(1003);

    /// The caller is not allowed to perform the operation.
    pub const FORBIDDEN: Code = Code(1100);

    /// The caller exceeded its request quota.
    pub const TOO_MANY_REQUESTS: Code = Code(1200);

    /// The service is temporarily refusing requests.
    pub const SERVICE_UNAVAILABLE: Code = Code(1201);

    /// Returns the HTTP status for this code.
    pub fn status(self) -> StatusCode {
        lookup(self).0
    }

    /// Returns the default message for this code.
    pub fn message(self) -> String {
        lookup(self).1
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Built-in entries of the code table.
const DEFAULTS: &[(Code, StatusCode, &str)] = &[
    (Code::SUCCESS, StatusCode::OK, "success"),
    (Code::FAILURE, StatusCode::BAD_REQUEST, "failure"),
    (Code::INVALID_PARAM, StatusCode::BAD_REQUEST, "invalid parameters"),
    (Code::NOT_FOUND, StatusCode::NOT_FOUND, "not found"),
    (Code::ALREADY_EXISTS, StatusCode::CONFLICT, "already exists"),
    (Code::TOO_LARGE, StatusCode::PAYLOAD_TOO_LARGE, "payload too large"),
    (Code::NEED_LOGIN, StatusCode::UNAUTHORIZED, "login required"),
    (Code::INVALID_TOKEN, StatusCode::UNAUTHORIZED, "invalid token"),
    (Code::TOKEN_EXPIRED, StatusCode::UNAUTHORIZED, "token expired"),
    (Code::INVALID_LOGIN, StatusCode::UNAUTHORIZED, "invalid username or password"),
    (Code::FORBIDDEN, StatusCode::FORBIDDEN, "forbidden"),
    (Code::TOO_MANY_REQUESTS, StatusCode::TOO_MANY_REQUESTS, "too many requests"),
    (Code::SERVICE_UNAVAILABLE, StatusCode::SERVICE_UNAVAILABLE, "service unavailable"),
];

/// Entries registered by the application, which win over `DEFAULTS`.
static USER_CODES: LazyLock<RwLock<HashMap<Code, (StatusCode, String)>>> =
    LazyLock::new(|| RwLock::new(HashMap::default()));

/// Registers `code` so that it maps to `status` and `message`, overriding any previous entry.
pub fn register(code: Code, status: StatusCode, message: &str) {
    let mut user_codes = USER_CODES.write().unwrap_or_else(|e| e.into_inner());
    user_codes.insert(code, (status, message.to_owned()));
}

/// Looks up the status and default message of `code`.  Unknown codes map to a server error.
fn lookup(code: Code) -> (StatusCode, String) {
    {
        let user_codes = USER_CODES.read().unwrap_or_else(|e| e.into_inner());
        if let Some((status, message)) = user_codes.get(&code) {
            return (*status, message.clone());
        }
    }
    match DEFAULTS.iter().find(|(c, _, _)| *c == code) {
        Some((_, status, message)) => (*status, (*message).to_owned()),
        None => (StatusCode::INTERNAL_SERVER_ERROR, format!("unknown code {}", code)),
    }
}
