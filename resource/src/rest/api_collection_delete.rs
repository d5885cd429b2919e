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

//! API to delete many records at once.

use crate::driver::Resource;
use crate::model::DeleteResponse;
use crate::rest::{fail, purge_param, service_context};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use restforge_audit::model::Operation;
use restforge_core::context::RequestContext;
use restforge_core::model::Model;
use restforge_core::rest::RestError;
use restforge_core::rest::envelope::success;
use std::collections::HashMap;

/// Collects the identifiers to delete from the `id` query parameter and the optional JSON array
/// in `body`.
fn collect_ids(raw: &HashMap<String, String>, body: &[u8]) -> Result<Vec<String>, RestError> {
    let mut ids = raw
        .get("id")
        .map(|v| v.split(',').map(str::to_owned).collect::<Vec<String>>())
        .unwrap_or_default();
    if !body.iter().all(u8::is_ascii_whitespace) {
        ids.extend(serde_json::from_slice::<Vec<String>>(body)?);
    }
    Ok(ids)
}

/// DELETE handler for this API.
pub(crate) async fn handler<M: Model>(
    State(resource): State<Resource<M>>,
    request: RequestContext,
    Query(raw): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, RestError> {
    let purge = purge_param(&raw)?;
    let ids = collect_ids(&raw, &body)?;
    let ctx = service_context(&resource, request, Operation::Delete);
    let deleted = resource.delete(&ctx, ids, purge).await.map_err(|e| fail(&ctx, e))?;
    Ok(success(StatusCode::OK, DeleteResponse { deleted }))
}
