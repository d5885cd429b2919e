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

//! Data types for authentication.

mod claims;
pub use claims::Claims;
mod fingerprint;
pub use fingerprint::Fingerprint;
mod passwords;
pub use passwords::{HashedPassword, Password};
mod session;
pub use session::Session;
mod user;
pub use user::{Credential, User};
mod username;
pub use username::Username;

/// Pair of tokens handed to a client after a successful login or refresh.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Tokens {
    /// Token to authenticate requests with.
    pub access_token: String,

    /// Token to obtain a new pair once the access token expires.
    pub refresh_token: String,
}
