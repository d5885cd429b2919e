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

//! Issuance and validation of JWTs.

use crate::driver::AuthOptions;
use crate::model::{Claims, Tokens};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use restforge_core::clocks::Clock;
use restforge_core::driver::{AuthFailure, DriverError, DriverResult};
use std::sync::Arc;

/// Reasons for rejecting a token.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum TokenError {
    /// The token is past its expiration time.
    #[error("Token expired")]
    Expired,

    /// The token was issued by someone else.
    #[error("Token has an invalid issuer")]
    InvalidIssuer,

    /// The token cannot be decoded or its signature is wrong.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The token is not valid yet.
    #[error("Token not yet valid")]
    NotYetValid,

    /// The access and refresh tokens belong to different subjects.
    #[error("Tokens belong to different subjects")]
    SubjectMismatch,
}

impl From<TokenError> for DriverError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => {
                DriverError::Unauthorized(AuthFailure::TokenExpired, e.to_string())
            }
            e => DriverError::Unauthorized(AuthFailure::InvalidToken, e.to_string()),
        }
    }
}

/// Mints and parses HS256-signed tokens.
#[derive(Clone)]
pub struct TokenService {
    /// Clock to obtain the current time.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Authentication options.
    opts: Arc<AuthOptions>,

    /// Key to sign tokens with.
    encoding: EncodingKey,

    /// Key to verify token signatures with.
    decoding: DecodingKey,
}

impl TokenService {
    /// Creates a new token service that signs tokens with the secret in `opts`.
    pub fn new(clock: Arc<dyn Clock + Send + Sync>, opts: Arc<AuthOptions>) -> Self {
        let encoding = EncodingKey::from_secret(opts.secret.as_bytes());
        let decoding = DecodingKey::from_secret(opts.secret.as_bytes());
        Self { clock, opts, encoding, decoding }
    }

    /// Returns true if `token` is the configured token that never expires.
    pub fn is_none_expire(&self, token: &str) -> bool {
        !self.opts.none_expire_token.is_empty() && token == self.opts.none_expire_token
    }

    /// Returns true if `username` is the principal reachable via the token that never expires.
    pub fn is_none_expire_username(&self, username: &str) -> bool {
        !self.opts.none_expire_token.is_empty() && username == self.opts.none_expire_username
    }

    /// Signs `claims`.
    fn sign(&self, claims: &Claims) -> DriverResult<String> {
        encode(&Header::default(), claims, &self.encoding)
            .map_err(|e| DriverError::BackendError(format!("Cannot sign token: {}", e)))
    }

    /// Issues a new access and refresh token pair for `user_id`/`username`.
    ///
    /// The principal reachable via the token that never expires gets that token back and no
    /// refresh token.
    pub fn gen_tokens(&self, user_id: &str, username: &str) -> DriverResult<Tokens> {
        if user_id.is_empty() {
            return Err(DriverError::InvalidInput("User identifier cannot be empty".to_owned()));
        }
        if username.len() < 3 {
            return Err(DriverError::InvalidInput(
                "Username must have at least 3 characters".to_owned(),
            ));
        }

        if self.is_none_expire_username(username) {
            return Ok(Tokens {
                access_token: self.opts.none_expire_token.clone(),
                refresh_token: String::new(),
            });
        }

        let now = self.clock.now_utc();
        let access = Claims::new(user_id, username, &self.opts.issuer, now, self.opts.access_ttl);
        let refresh = Claims::new(user_id, username, &self.opts.issuer, now, self.opts.refresh_ttl);
        Ok(Tokens { access_token: self.sign(&access)?, refresh_token: self.sign(&refresh)? })
    }

    /// Verifies the signature and issuer of `token` and returns its claims without checking
    /// validity times.
    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_issuer(&[self.opts.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                ErrorKind::InvalidIssuer => Err(TokenError::InvalidIssuer),
                _ => Err(TokenError::Malformed(e.to_string())),
            },
        }
    }

    /// Checks the validity times of `claims` against the current time.
    fn check_times(&self, claims: &Claims) -> Result<(), TokenError> {
        let now = self.clock.now_unix();
        if claims.nbf > now {
            Err(TokenError::NotYetValid)
        } else if claims.exp <= now {
            Err(TokenError::Expired)
        } else {
            Ok(())
        }
    }

    /// Parses and fully validates `token`.
    pub fn parse_token(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.decode(token)?;
        self.check_times(&claims)?;
        Ok(claims)
    }

    /// Validates a token pair for rotation and returns the claims of the refresh token.
    ///
    /// The refresh token must be fully valid.  The access token may have expired but must
    /// otherwise be valid and belong to the same subject as the refresh token.
    pub fn check_refresh(&self, access: &str, refresh: &str) -> Result<Claims, TokenError> {
        let refresh_claims = self.parse_token(refresh)?;

        let access_claims = self.decode(access)?;
        match self.check_times(&access_claims) {
            Ok(()) | Err(TokenError::Expired) => (),
            Err(e) => return Err(e),
        }

        if access_claims.sub != refresh_claims.sub {
            return Err(TokenError::SubjectMismatch);
        }
        Ok(refresh_claims)
    }
}
