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

//! Extends the driver with the `logout` method.

use crate::driver::AuthnDriver;
use log::info;
use restforge_core::driver::DriverResult;

impl AuthnDriver {
    /// Terminates the session of `user_id`.  Logging out without a session is not an error.
    pub async fn logout(self, user_id: &str) -> DriverResult<()> {
        self.sessions.remove(user_id).await?;
        info!("User {} logged out", user_id);
        Ok(())
    }
}
