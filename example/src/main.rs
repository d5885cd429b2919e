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

//! Entry point to the sample service.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use restforge_core::config::Config;
use restforge_core::env::get_optional_var;
use restforge_example::serve;
use std::path::PathBuf;
use std::process::ExitCode;

/// Default location of the configuration file.
const DEFAULT_CONFIG: &str = "restforge.toml";

/// Determines the configuration file to load: the first argument, `RESTFORGE_CONFIG` or the
/// default, in that order.
fn config_path() -> Result<PathBuf, String> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    let path = get_optional_var::<String>("RESTFORGE", "CONFIG")?;
    Ok(PathBuf::from(path.unwrap_or_else(|| DEFAULT_CONFIG.to_owned())))
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = match config_path() {
        Ok(path) => Config::from_file(&path).map_err(|e| e.to_string()),
        Err(e) => Err(e),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log::error!("Cannot load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
