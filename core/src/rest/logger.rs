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

//! Access logging.

use crate::context::{RequestContext, RequestLogger};
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

/// Middleware that logs every request once the handler has produced a response.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let ctx = request.extensions().get::<RequestContext>().cloned().unwrap_or_default();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed();

    let logger = RequestLogger::new(&ctx, "http");
    let status = response.status();
    let line = format!("{} {} -> {} in {:?}", method, uri, status.as_u16(), elapsed);
    if status.is_server_error() {
        logger.error(line);
    } else if status.is_client_error() {
        logger.warn(line);
    } else {
        logger.info(line);
    }
    response
}
