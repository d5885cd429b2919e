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

//! The `Session` data type.

use crate::model::Fingerprint;
use async_trait::async_trait;
use restforge_core::model::{Base, Model};
use serde::{Deserialize, Serialize};

/// Represents a user session as persisted in the `sessions` table.
///
/// There is at most one live session per user: logging in again replaces any previous session.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Session {
    /// Common fields.
    #[serde(flatten)]
    pub base: Base,

    /// Identifier of the user that owns the session.
    pub user_id: String,

    /// Name of the user that owns the session.
    pub username: String,

    /// Access token currently bound to the session.
    pub access_token: String,

    /// Refresh token currently bound to the session.
    pub refresh_token: String,

    /// Device the session was opened from.
    #[serde(flatten)]
    pub fingerprint: Fingerprint,
}

impl Session {
    /// Creates a new session for `user_id`/`username` opened from the `fingerprint` device.
    pub fn new(user_id: &str, username: &str, fingerprint: Fingerprint) -> Self {
        Self {
            user_id: user_id.to_owned(),
            username: username.to_owned(),
            fingerprint,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Model for Session {
    fn table_name() -> &'static str {
        "sessions"
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_row_is_flat() {
        let fingerprint = Fingerprint { platform: "X11".to_owned(), ..Default::default() };
        let mut session = Session::new("uid", "alice", fingerprint);
        session.access_token = "a".to_owned();
        let doc = serde_json::to_value(&session).unwrap();
        assert_eq!(json!("uid"), doc["user_id"]);
        assert_eq!(json!("a"), doc["access_token"]);
        assert_eq!(json!("X11"), doc["platform"]);
        assert_eq!(json!(""), doc["browser_name"]);

        let back: Session = serde_json::from_value(doc).unwrap();
        assert_eq!(session, back);
    }
}
