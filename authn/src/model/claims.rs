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

//! The `Claims` data type.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Contents of the access and refresh tokens.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Claims {
    /// Identifier of the user the token was issued to.
    pub user_id: String,

    /// Name of the user the token was issued to.
    pub username: String,

    /// Issuer of the token.
    pub iss: String,

    /// Subject of the token, which is always the user identifier.
    pub sub: String,

    /// Issuance time in seconds since the epoch.
    pub iat: i64,

    /// Time before which the token is not valid, in seconds since the epoch.
    pub nbf: i64,

    /// Expiration time in seconds since the epoch.
    pub exp: i64,

    /// Unique identifier of the token, so that tokens minted within the same second differ.
    #[serde(default)]
    pub jti: String,
}

impl Claims {
    /// Creates the claims for a token issued to `user_id`/`username` at `now` that expires after
    /// `ttl`.
    pub fn new(
        user_id: &str,
        username: &str,
        issuer: &str,
        now: OffsetDateTime,
        ttl: Duration,
    ) -> Self {
        let now = now.unix_timestamp();
        Self {
            user_id: user_id.to_owned(),
            username: username.to_owned(),
            iss: issuer.to_owned(),
            sub: user_id.to_owned(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }
}
