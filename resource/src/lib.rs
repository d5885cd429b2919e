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

//! Generic CRUD pipeline over restforge records and assembly of complete applications.
//!
//! Every record type registered with an `App` gets the full set of REST operations (create,
//! delete, update, partial update, list, get, their batch variants, export and import) mounted
//! under its own path.  All operations share the same pipeline: decode the inputs, run the
//! service and model hooks before the storage operation, run the storage operation, run the
//! hooks after it, record the audit entry and wrap the result in the response envelope.
//!
//! Domain-specific behavior is plugged in by implementing `Service` for the record type.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

pub mod app;
pub use app::App;
pub mod driver;
pub use driver::{Resource, ResourceOptions};
pub mod model;
pub mod rest;
pub mod service;
pub use service::{NoService, Service, ServiceContext, ServiceError, ServiceResult};
