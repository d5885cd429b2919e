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

//! Business logic for user authentication.

use crate::model::{Credential, Session, User};
use derivative::Derivative;
use log::{info, warn};
use restforge_core::clocks::Clock;
use restforge_core::config::{Section, duration};
use restforge_core::database::Database;
use restforge_core::db::Db;
use restforge_core::driver::DriverResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

mod accounts;
mod authenticator;
mod login;
mod logout;
mod refresh;
mod sessions;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
mod tokens;
mod verify;

pub use authenticator::{Authenticator, DbAuthenticator};
pub use sessions::SessionStore;
pub use tokens::{TokenError, TokenService};

/// Secret used when none is configured.  Only suitable for development.
const DEFAULT_SECRET: &str = "restforge-insecure-default-secret";

/// Configuration for the `auth` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AuthOptions {
    /// Shared secret to sign tokens with.
    pub secret: String,

    /// Issuer stamped into and required from all tokens.
    pub issuer: String,

    /// Lifetime of access tokens.
    #[serde(with = "duration")]
    pub access_ttl: Duration,

    /// Lifetime of refresh tokens, which is also the lifetime of sessions.
    #[serde(with = "duration")]
    pub refresh_ttl: Duration,

    /// Literal access token that never expires.  Empty disables it.
    pub none_expire_token: String,

    /// User that receives `none_expire_token` when logging in.
    pub none_expire_username: String,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            secret: DEFAULT_SECRET.to_owned(),
            issuer: "restforge".to_owned(),
            access_ttl: Duration::from_secs(2 * 60 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            none_expire_token: String::new(),
            none_expire_username: "root".to_owned(),
        }
    }
}

impl Section for AuthOptions {
    const NAME: &'static str = "auth";
}

/// The authenticated principal behind a request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Identity {
    /// Identifier of the user.
    pub user_id: String,

    /// Name of the user.
    pub username: String,

    /// Identifier of the session the request belongs to.  Empty for the none-expire token.
    pub session_id: String,
}

/// Business logic.
#[derive(Derivative)]
#[derivative(Clone(bound = ""))]
pub struct AuthnDriver {
    /// The database that the driver uses for persistence.
    db: Arc<dyn Db + Send + Sync>,

    /// Clock instance to obtain the current time.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Options for the authentication driver.
    opts: Arc<AuthOptions>,

    /// Token minting and validation.
    tokens: TokenService,

    /// Live sessions.
    sessions: SessionStore,

    /// Verifier of login credentials.
    authenticator: Arc<dyn Authenticator + Send + Sync>,
}

impl AuthnDriver {
    /// Creates a new driver backed by the given dependencies.
    ///
    /// Credentials are verified against the `credentials` table until a different authenticator
    /// is configured with `with_authenticator`.
    pub fn new(
        db: Arc<dyn Db + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
        opts: Arc<AuthOptions>,
    ) -> Self {
        let tokens = TokenService::new(clock.clone(), opts.clone());
        let session_db = Database::new(db.clone(), clock.clone());
        let sessions = SessionStore::new(session_db, clock.clone(), opts.refresh_ttl);
        let authenticator =
            Arc::from(DbAuthenticator::new(Database::new(db.clone(), clock.clone())));
        Self { db, clock, opts, tokens, sessions, authenticator }
    }

    /// Replaces the verifier of login credentials.
    pub fn with_authenticator(
        mut self,
        authenticator: Arc<dyn Authenticator + Send + Sync>,
    ) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Creates the tables this driver needs and loads the persisted sessions.
    pub async fn init(&self) -> DriverResult<()> {
        if self.opts.secret == DEFAULT_SECRET {
            warn!("auth.secret is not set; tokens are signed with an insecure default");
        }
        self.sessions_db().migrate().await?;
        self.users_db().migrate().await?;
        self.credentials_db().migrate().await?;
        let count = self.sessions.warm().await?;
        info!("Loaded {} persisted sessions", count);
        Ok(())
    }

    /// Returns the authentication options provided at creation time.
    pub fn opts(&self) -> &AuthOptions {
        &self.opts
    }

    /// Returns the token service.
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Returns the store of live sessions.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Returns a builder over the `users` table.
    pub fn users_db(&self) -> Database<User> {
        Database::new(self.db.clone(), self.clock.clone())
    }

    /// Returns a builder over the `credentials` table.
    pub(crate) fn credentials_db(&self) -> Database<Credential> {
        Database::new(self.db.clone(), self.clock.clone())
    }

    /// Returns a builder over the `sessions` table.
    pub(crate) fn sessions_db(&self) -> Database<Session> {
        Database::new(self.db.clone(), self.clock.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restforge_core::config::Config;
    use serde_json::json;

    #[test]
    fn test_options_defaults() {
        temp_env::with_vars_unset(["AUTH_SECRET", "AUTH_ACCESS_TTL", "AUTH_ISSUER"], || {
            let config = Config::from_value(json!({})).unwrap();
            config.register::<AuthOptions>();
            assert_eq!(AuthOptions::default(), *config.get::<AuthOptions>().unwrap());
        });
    }

    #[test]
    fn test_options_from_file_and_env() {
        temp_env::with_vars(
            [("AUTH_ACCESS_TTL", Some("15m")), ("AUTH_SECRET", None), ("AUTH_ISSUER", None)],
            || {
                let config = Config::from_value(json!({
                    "auth": {"secret": "s3cr3t", "refresh_ttl": "1d", "none_expire_token": "x"},
                }))
                .unwrap();
                config.register::<AuthOptions>();
                let opts = config.get::<AuthOptions>().unwrap();
                assert_eq!(
                    AuthOptions {
                        secret: "s3cr3t".to_owned(),
                        access_ttl: Duration::from_secs(15 * 60),
                        refresh_ttl: Duration::from_secs(24 * 60 * 60),
                        none_expire_token: "x".to_owned(),
                        ..Default::default()
                    },
                    *opts
                );
            },
        );
    }
}
