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

//! Sample service that manages user accounts and groups on top of restforge.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use restforge_authn::model::User;
use restforge_core::config::Config;
use restforge_resource::app::AppResult;
use restforge_resource::{App, ResourceOptions};
use std::sync::Arc;

pub mod driver;
use driver::{GroupService, UserService};
pub mod model;
use model::Group;
#[cfg(test)]
mod testutils;
#[cfg(test)]
mod tests;

/// Mounts the resources of the service on `app`.
pub fn register(app: &mut App) {
    let users = Arc::from(UserService::new(app.authn().clone()));
    app.register::<User>("users", users, ResourceOptions::default());
    app.register::<Group>("groups", Arc::from(GroupService), ResourceOptions { purge: true });
}

/// Instantiates all resources described by `config` and serves them until terminated.
pub async fn serve(config: Config) -> AppResult<()> {
    let mut app = App::new(config).await?;
    register(&mut app);
    app.serve().await
}
