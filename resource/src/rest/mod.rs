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

//! REST interface for a resource.

use crate::driver::{MAX_IMPORT_SIZE, Resource};
use crate::model::parse_bool;
use crate::service::ServiceContext;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use restforge_audit::model::Operation;
use restforge_core::context::RequestContext;
use restforge_core::driver::DriverError;
use restforge_core::model::Model;
use restforge_core::rest::RestError;
use std::collections::HashMap;

mod api_batch_delete;
mod api_batch_patch;
mod api_batch_post;
mod api_batch_put;
mod api_collection_delete;
mod api_collection_get;
mod api_collection_post;
mod api_export_get;
mod api_import_post;
mod api_item_delete;
mod api_item_get;
mod api_item_patch;
mod api_item_put;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

/// Parameter that overrides the choice between physical and logical deletion.
const PURGE: &str = "_purge";

/// Extracts the optional purge choice from the query parameters in `raw`.
fn purge_param(raw: &HashMap<String, String>) -> Result<Option<bool>, RestError> {
    raw.get(PURGE).map(|v| parse_bool(PURGE, v)).transpose().map_err(RestError::InvalidRequest)
}

/// Builds the context for `operation` on `resource` within `request`.
fn service_context<M: Model>(
    resource: &Resource<M>,
    request: RequestContext,
    operation: Operation,
) -> ServiceContext {
    ServiceContext::new(request, resource.name(), operation)
}

/// Converts a failure of the operation in `ctx` into a response, logging it along the way.
fn fail(ctx: &ServiceContext, e: DriverError) -> RestError {
    let e = RestError::from(e);
    let (code, status) = e.code_and_status();
    if status.is_server_error() {
        ctx.logger().error(format_args!("Failed with code {}: {}", code, e));
    } else {
        ctx.logger().warn(format_args!("Rejected with code {}: {}", code, e));
    }
    e
}

/// Creates the router for `resource`, to be nested under the resource's name.
pub fn router<M: Model>(resource: Resource<M>) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route(
            "/",
            post(api_collection_post::handler::<M>)
                .get(api_collection_get::handler::<M>)
                .delete(api_collection_delete::handler::<M>),
        )
        .route(
            "/batch",
            post(api_batch_post::handler::<M>)
                .put(api_batch_put::handler::<M>)
                .patch(api_batch_patch::handler::<M>)
                .delete(api_batch_delete::handler::<M>),
        )
        .route("/export", get(api_export_get::handler::<M>))
        .route(
            "/import",
            post(api_import_post::handler::<M>)
                .layer(DefaultBodyLimit::max(MAX_IMPORT_SIZE + 1024 * 1024)),
        )
        .route(
            "/:id",
            get(api_item_get::handler::<M>)
                .put(api_item_put::handler::<M>)
                .patch(api_item_patch::handler::<M>)
                .delete(api_item_delete::handler::<M>),
        )
        .with_state(resource)
}
