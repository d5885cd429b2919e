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

//! Extends the driver with the `refresh` method.

use crate::driver::AuthnDriver;
use crate::model::{Fingerprint, Session, Tokens};
use log::info;
use restforge_core::driver::{AuthFailure, DriverError, DriverResult};

impl AuthnDriver {
    /// Exchanges a refresh token for a new pair of tokens.
    ///
    /// The access token may have expired but must otherwise be valid and belong to the same user
    /// as the refresh token.  Both tokens must be the ones bound to the live session of the user
    /// and the request must come from the device that opened it.  Both tokens are rotated.
    pub async fn refresh(
        self,
        access_token: &str,
        refresh_token: &str,
        user_agent: &str,
    ) -> DriverResult<Tokens> {
        let claims = self.tokens.check_refresh(access_token, refresh_token)?;

        let invalid =
            |msg: &str| DriverError::Unauthorized(AuthFailure::InvalidToken, msg.to_owned());
        let session =
            self.sessions.get(&claims.user_id).await.ok_or_else(|| invalid("Session not found"))?;
        if session.refresh_token != refresh_token || session.access_token != access_token {
            return Err(invalid("Token has been replaced"));
        }
        if session.fingerprint != Fingerprint::parse(user_agent) {
            return Err(invalid("Token used from another device"));
        }

        let tokens = self.tokens.gen_tokens(&claims.user_id, &claims.username)?;
        let rotated = Session {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            ..Session::new(&session.user_id, &session.username, session.fingerprint)
        };
        self.sessions.set(&claims.user_id, rotated).await?;
        info!("Rotated tokens of user {}", claims.username);
        Ok(tokens)
    }
}
