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

//! Utilities to deal with HTTP authorization.

use http::header::{self, HeaderMap};
use restforge_core::rest::{Code, RestError, RestResult, get_unique_header};

/// Builds an authorization error with `code` and `message`.
fn unauthorized<S: Into<String>>(code: Code, message: S) -> RestError {
    RestError::Unauthorized { code, message: message.into() }
}

/// Checks if the request has an authorization header.
pub fn has_bearer_auth(headers: &HeaderMap) -> RestResult<bool> {
    match get_unique_header(headers, &header::AUTHORIZATION) {
        Ok(value) => Ok(value.is_some()),
        Err(e) => Err(unauthorized(Code::INVALID_TOKEN, e.to_string())),
    }
}

/// Assumes that the `headers` contain a bearer token and extracts it.
///
/// A request without credentials needs to log in whereas a request with unusable credentials has
/// an invalid token.
pub fn get_bearer_auth(headers: &HeaderMap) -> RestResult<String> {
    let authz = match get_unique_header(headers, &header::AUTHORIZATION) {
        Ok(Some(value)) => value,
        Ok(None) => return Err(unauthorized(Code::NEED_LOGIN, "Missing Authorization header")),
        Err(e) => return Err(unauthorized(Code::INVALID_TOKEN, e.to_string())),
    };

    let authz = authz.to_str().map_err(|e| {
        unauthorized(Code::INVALID_TOKEN, format!("Bad encoding in Authorization header: {}", e))
    })?;

    let (scheme, payload) = match authz.trim().split_once(' ') {
        Some((scheme, payload)) => (scheme, payload.trim()),
        None if authz.trim().is_empty() => {
            return Err(unauthorized(Code::NEED_LOGIN, "Missing Authorization header"));
        }
        None => {
            return Err(unauthorized(
                Code::INVALID_TOKEN,
                "Bad Authorization header: missing payload",
            ));
        }
    };
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(unauthorized(Code::INVALID_TOKEN, "Unsupported scheme"));
    }
    if payload.is_empty() {
        return Err(unauthorized(Code::INVALID_TOKEN, "Bad Authorization header: missing payload"));
    }
    Ok(payload.to_owned())
}

/// Extracts the `User-Agent` of the request, which is empty if missing or unreadable.
pub fn get_user_agent(headers: &HeaderMap) -> String {
    headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or_default().to_owned()
}
