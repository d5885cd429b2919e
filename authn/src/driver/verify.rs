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

//! Extends the driver with the `verify` method.

use crate::driver::{AuthnDriver, Identity};
use crate::model::Fingerprint;
use log::debug;
use restforge_core::driver::{AuthFailure, DriverError, DriverResult};

impl AuthnDriver {
    /// Resolves the bearer `token` presented from the device described by `user_agent` into the
    /// identity of its owner.
    ///
    /// Besides being valid, the token must be the access token currently bound to the live
    /// session of its owner and the device must be the one that opened the session.
    pub async fn verify(&self, token: &str, user_agent: &str) -> DriverResult<Identity> {
        if self.tokens.is_none_expire(token) {
            return Ok(Identity {
                user_id: self.opts.none_expire_username.clone(),
                username: self.opts.none_expire_username.clone(),
                session_id: String::new(),
            });
        }

        let claims = self.tokens.parse_token(token)?;

        let reject = |msg: &str| {
            debug!("Rejecting token of user {}: {}", claims.username, msg);
            DriverError::Unauthorized(AuthFailure::InvalidToken, msg.to_owned())
        };
        let session = match self.sessions.get(&claims.user_id).await {
            Some(session) => session,
            None => return Err(reject("Session not found")),
        };
        if session.access_token != token {
            return Err(reject("Token has been replaced"));
        }
        if session.fingerprint != Fingerprint::parse(user_agent) {
            return Err(reject("Token used from another device"));
        }

        Ok(Identity {
            user_id: claims.user_id,
            username: claims.username,
            session_id: session.base.id,
        })
    }
}
