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

//! API to upload records from a file.

use crate::driver::{MAX_IMPORT_SIZE, Resource};
use crate::rest::{fail, service_context};
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use restforge_audit::model::Operation;
use restforge_core::context::RequestContext;
use restforge_core::model::Model;
use restforge_core::rest::RestError;
use restforge_core::rest::envelope::success;

/// Name of the form field that carries the file.
const FILE_FIELD: &str = "file";

/// Converts a failure to read the form into a response error.
fn multipart_error(e: MultipartError) -> RestError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RestError::PayloadTooLarge(format!("Import files cannot exceed {} bytes", MAX_IMPORT_SIZE))
    } else {
        RestError::InvalidRequest(e.body_text())
    }
}

/// Reads the contents of the file field from `form`.
async fn read_file(mut form: Multipart) -> Result<Bytes, RestError> {
    while let Some(field) = form.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(FILE_FIELD) {
            let data = field.bytes().await.map_err(multipart_error)?;
            if data.len() > MAX_IMPORT_SIZE {
                return Err(RestError::PayloadTooLarge(format!(
                    "Import files cannot exceed {} bytes",
                    MAX_IMPORT_SIZE
                )));
            }
            return Ok(data);
        }
    }
    Err(RestError::InvalidRequest(format!("Missing form field '{}'", FILE_FIELD)))
}

/// POST handler for this API.
pub(crate) async fn handler<M: Model>(
    State(resource): State<Resource<M>>,
    request: RequestContext,
    form: Result<Multipart, MultipartRejection>,
) -> Result<Response, RestError> {
    let form = form.map_err(|e| RestError::InvalidRequest(e.body_text()))?;
    let data = read_file(form).await?;
    let ctx = service_context(&resource, request, Operation::Import);
    let response = resource.import(&ctx, &data).await.map_err(|e| fail(&ctx, e))?;
    Ok(success(StatusCode::OK, response))
}
