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

//! API to replace many records at once.

use crate::driver::Resource;
use crate::model::BatchRequest;
use crate::rest::{fail, service_context};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use restforge_audit::model::Operation;
use restforge_core::context::RequestContext;
use restforge_core::model::Model;
use restforge_core::rest::envelope::success;
use restforge_core::rest::{JsonBody, RestError};

/// PUT handler for this API.
pub(crate) async fn handler<M: Model>(
    State(resource): State<Resource<M>>,
    request: RequestContext,
    JsonBody(batch): JsonBody<BatchRequest>,
) -> Result<Response, RestError> {
    let ctx = service_context(&resource, request, Operation::BatchUpdate);
    let response = resource.batch_update(&ctx, batch).await.map_err(|e| fail(&ctx, e))?;
    Ok(success(StatusCode::OK, response))
}
