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

//! The uniform response envelope.
//!
//! Every response has the shape `{"code": ..., "msg": ..., "data": ..., "request_id": ...}`.
//! The request identifier comes from the task-local set by the trace middleware.

use crate::context::current_request_id;
use crate::rest::codes::Code;
use axum::response::{IntoResponse, Response};
use http::{HeaderName, HeaderValue, StatusCode, header};
use serde::{Deserialize, Serialize};

/// Header that marks responses served from the cache.
pub static X_CACHED: HeaderName = HeaderName::from_static("x-cached");

/// The response envelope.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct Envelope<T> {
    /// Response code from the code table.
    pub code: Code,

    /// Human-readable message.
    pub msg: String,

    /// Payload, which is `null` for errors.
    pub data: T,

    /// Identifier of the request that produced this response.
    pub request_id: String,
}

/// Payload of list responses.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct ListData<T> {
    /// Records in the requested page.
    pub items: Vec<T>,

    /// Total number of records that match the query, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

/// Builds a JSON response with `status` and a pre-serialized `body`.
fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Serializes an envelope for `code` with `msg` and `data`.
pub fn envelope<T: Serialize>(status: StatusCode, code: Code, msg: String, data: T) -> Response {
    let envelope = Envelope { code, msg, data, request_id: current_request_id() };
    match serde_json::to_vec(&envelope) {
        Ok(body) => json_response(status, body),
        Err(e) => {
            log::error!("Failed to serialize response: {}", e);
            let fallback = Envelope {
                code: Code::FAILURE,
                msg: format!("Failed to serialize response: {}", e),
                data: (),
                request_id: envelope.request_id,
            };
            let body = serde_json::to_vec(&fallback).unwrap_or_default();
            json_response(StatusCode::INTERNAL_SERVER_ERROR, body)
        }
    }
}

/// Builds a successful response with `status` carrying `data`.
pub fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    envelope(status, Code::SUCCESS, Code::SUCCESS.message(), data)
}

/// Wraps the raw JSON payload `data` in a successful envelope without re-serializing it.
fn splice(data: &[u8]) -> Vec<u8> {
    let request_id =
        serde_json::to_string(&current_request_id()).unwrap_or_else(|_| "\"\"".to_owned());
    let msg = serde_json::to_string(&Code::SUCCESS.message()).unwrap_or_else(|_| "\"\"".to_owned());

    let mut body = Vec::with_capacity(data.len() + 64);
    let head = format!("{{\"code\":{},\"msg\":{},\"data\":", Code::SUCCESS, msg);
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!(",\"request_id\":{}}}", request_id).as_bytes());
    body
}

/// Builds a successful response out of the cached JSON payload `data`.
pub fn bytes(data: &[u8]) -> Response {
    let mut response = json_response(StatusCode::OK, splice(data));
    response.headers_mut().insert(X_CACHED.clone(), HeaderValue::from_static("true"));
    response
}

/// Builds a successful list response out of the cached JSON array `items`.
pub fn bytes_list(items: &[u8], total: Option<i64>) -> Response {
    let mut data = Vec::with_capacity(items.len() + 32);
    data.extend_from_slice(b"{\"items\":");
    data.extend_from_slice(items);
    if let Some(total) = total {
        data.extend_from_slice(format!(",\"total\":{}", total).as_bytes());
    }
    data.push(b'}');

    let mut response = json_response(StatusCode::OK, splice(&data));
    response.headers_mut().insert(X_CACHED.clone(), HeaderValue::from_static("true"));
    response
}
