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

//! Conversion of panics into error envelopes.

use crate::rest::RestError;
use axum::response::{IntoResponse, Response};
use std::any::Any;
use std::backtrace::Backtrace;
use tower_http::catch_panic::CatchPanicLayer;

/// Signature of the panic handler.
type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Logs the panic described by `details` and turns it into an internal error.
fn handle_panic(details: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = details.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = details.downcast_ref::<&str>() {
        (*s).to_owned()
    } else {
        "Unknown panic".to_owned()
    };
    log::error!("Handler panicked: {}\n{}", message, Backtrace::force_capture());
    RestError::InternalError("Internal server error".to_owned()).into_response()
}

/// Creates the layer that recovers from panics in the wrapped services.
pub fn recovery_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(handle_panic as PanicHandler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::Code;
    use crate::rest::testutils::OneShotBuilder;
    use axum::Router;
    use axum::routing::get;
    use http::{Method, StatusCode};

    async fn explode() -> &'static str {
        panic!("boom");
    }

    #[tokio::test]
    async fn test_panic_becomes_envelope() {
        let app = Router::new().route("/explode", get(explode)).layer(recovery_layer());
        OneShotBuilder::new(app, (Method::GET, "/explode"))
            .send_empty()
            .await
            .expect_status(StatusCode::INTERNAL_SERVER_ERROR)
            .expect_error(Code::FAILURE, "Internal server error")
            .await;
    }
}
