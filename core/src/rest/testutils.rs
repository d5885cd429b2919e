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

//! Test utilities to drive a router in-process and to validate its envelopes.

use crate::rest::Code;
use crate::rest::envelope::Envelope;
use axum::Router;
use axum::body::Body;
use axum::http::{self, HeaderName, HeaderValue, Request};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use tower::util::ServiceExt;

/// Maximum body size for testing purposes.
const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// Builder for a single request to the API server.
#[must_use]
pub struct OneShotBuilder {
    /// The router for the app being tested.
    app: Router,

    /// Builder for the request that will be sent to the app.
    builder: http::request::Builder,
}

impl OneShotBuilder {
    /// Creates a new request against a given `method`/`uri` pair served by an `app` router.
    pub fn new<U: AsRef<str>>(app: Router, (method, uri): (http::Method, U)) -> Self {
        let builder = Request::builder().method(method).uri(uri.as_ref());
        Self { app, builder }
    }

    /// Extends the URI in the request with a `query`.
    pub fn with_query<Q: Serialize>(mut self, query: Q) -> Self {
        let uri = self.builder.uri_ref().unwrap().to_string();
        assert!(!uri.contains('?'), "URI already contains a query: {}", uri);
        self.builder =
            self.builder.uri(format!("{}?{}", uri, serde_urlencoded::to_string(query).unwrap()));
        self
    }

    /// Adds bearer authentication to the request.
    pub fn with_bearer_auth<T: fmt::Display>(mut self, token: T) -> Self {
        let value = format!("Bearer {}", token);
        self.builder = self.builder.header(http::header::AUTHORIZATION, value);
        self
    }

    /// Sets the header `name` to `value` in the outgoing request.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.builder = self.builder.header(name, value);
        self
    }

    /// Sends `request` to the app.
    async fn send(self, request: Request<Body>) -> ResponseChecker {
        ResponseChecker::from(self.app.oneshot(request).await.unwrap())
    }

    /// Finishes building the request and sends it with an empty payload.
    pub async fn send_empty(mut self) -> ResponseChecker {
        let builder = std::mem::take(&mut self.builder);
        let request = builder.body(Body::empty()).unwrap();
        self.send(request).await
    }

    /// Finishes building the request and sends it with a text payload.
    pub async fn send_text<T: Into<String>>(mut self, text: T) -> ResponseChecker {
        let builder = std::mem::take(&mut self.builder);
        let request = builder
            .header(http::header::CONTENT_TYPE, mime::TEXT_PLAIN.as_ref())
            .body(Body::from(text.into()))
            .unwrap();
        self.send(request).await
    }

    /// Finishes building the request and sends it with a JSON payload.
    pub async fn send_json<T: Serialize>(mut self, request: T) -> ResponseChecker {
        let builder = std::mem::take(&mut self.builder);
        let request = builder
            .header(http::header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .body(Body::from(serde_json::to_vec(&request).unwrap()))
            .unwrap();
        self.send(request).await
    }

    /// Finishes building the request and sends it as a multipart form with a single file
    /// attached to `field`.
    pub async fn send_file(
        mut self,
        field: &str,
        filename: &str,
        content: Bytes,
    ) -> ResponseChecker {
        let boundary = "restforge-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                boundary, field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(&content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        let builder = std::mem::take(&mut self.builder);
        let request = builder
            .header(
                http::header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }
}

/// Type alias for the response type returned by the router.
type HttpResponse = http::Response<Body>;

/// Validator for the outcome of a request sent by a `OneShotBuilder`.
#[must_use]
pub struct ResponseChecker {
    /// Actual response that we received from the app.
    response: HttpResponse,

    /// Expected HTTP status code in the response above.
    exp_status: http::StatusCode,
}

impl From<HttpResponse> for ResponseChecker {
    fn from(response: HttpResponse) -> Self {
        Self { response, exp_status: http::StatusCode::OK }
    }
}

impl ResponseChecker {
    /// Sets the expected exit HTTP status to `status`.
    pub fn expect_status(mut self, status: http::StatusCode) -> Self {
        self.exp_status = status;
        self
    }

    /// Expects the response to carry header `name` with `value`.
    pub fn expect_header(self, name: &str, value: &str) -> Self {
        match self.response.headers().get(name) {
            Some(actual) => assert_eq!(value, actual, "Unexpected value for header {}", name),
            None => panic!("Header {} not in response", name),
        }
        self
    }

    /// Expects the response to not carry header `name`.
    pub fn expect_no_header(self, name: &str) -> Self {
        assert!(self.response.headers().get(name).is_none(), "Header {} in response", name);
        self
    }

    /// Performs common validation operations on the response.
    pub fn verify(&self) {
        assert_eq!(self.exp_status, self.response.status());
    }

    /// Reads the whole body of the response.
    async fn take_body(self) -> Bytes {
        self.verify();
        axum::body::to_bytes(self.response.into_body(), MAX_BODY_SIZE).await.unwrap()
    }

    /// Reads the body of the response as an envelope.
    async fn take_envelope(self) -> Envelope<Value> {
        let body = self.take_body().await;
        match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                let body = String::from_utf8_lossy(&body);
                panic!("Invalid envelope due to {}; content was {}", e, body);
            }
        }
    }

    /// Finishes checking the response and expects it to contain an empty body.
    pub async fn expect_empty(self) {
        let body = self.take_body().await;
        assert!(body.is_empty(), "Body not empty; got {}", String::from_utf8_lossy(&body));
    }

    /// Finishes checking the response and expects it to be a successful envelope whose data is
    /// of type `T`.
    pub async fn expect_data<T: DeserializeOwned>(self) -> T {
        let envelope = self.take_envelope().await;
        assert_eq!(Code::SUCCESS, envelope.code, "Unexpected code; msg was {}", envelope.msg);
        serde_json::from_value(envelope.data).unwrap()
    }

    /// Finishes checking the response and returns the raw envelope.
    pub async fn expect_envelope(self) -> Envelope<Value> {
        self.take_envelope().await
    }

    /// Finishes checking the response and expects it to be an error envelope with `code` whose
    /// message matches `exp_re`.
    pub async fn expect_error(self, code: Code, exp_re: &str) {
        let envelope = self.take_envelope().await;
        assert_eq!(code, envelope.code, "Unexpected code; msg was {}", envelope.msg);
        assert_eq!(Value::Null, envelope.data);
        let re = regex::Regex::new(exp_re).unwrap();
        assert!(
            re.is_match(&envelope.msg),
            "Response message '{}' does not match re '{}'",
            envelope.msg,
            exp_re
        );
    }

    /// Finishes checking the response and expects it to be an envelope with `code`.
    pub async fn expect_code(self, code: Code) {
        let envelope = self.take_envelope().await;
        assert_eq!(code, envelope.code, "Unexpected code; msg was {}", envelope.msg);
    }

    /// Finishes checking the response and returns the body of the response as raw bytes.
    pub async fn take_body_as_bytes(self) -> Bytes {
        self.take_body().await
    }

    /// Finishes checking the response and returns the response itself for out of band
    /// validation of properties not supported by the `ResponseChecker`.
    pub async fn take_response(self) -> HttpResponse {
        self.verify();
        self.response
    }
}

/// Generates a test to verify that an API that expects JSON fails when it gets something else.
#[macro_export]
macro_rules! test_payload_must_be_json {
    ( $app:expr, $route:expr $(, $query:expr)? ) => {
        #[tokio::test]
        async fn test_payload_must_be_json() {
            $crate::rest::testutils::OneShotBuilder::new($app, $route)
                $( .with_query($query) )?
                .send_text("this is not json")
                .await
                .expect_status(axum::http::StatusCode::BAD_REQUEST)
                .expect_error($crate::rest::Code::INVALID_PARAM, "Content-Type")
                .await;

            $crate::rest::testutils::OneShotBuilder::new($app, $route)
                $( .with_query($query) )?
                .with_header(axum::http::header::CONTENT_TYPE, "application/json")
                .send_text("this is not json")
                .await
                .expect_status(axum::http::StatusCode::BAD_REQUEST)
                .expect_error($crate::rest::Code::INVALID_PARAM, "expected ident")
                .await;
        }
    };
}

pub use test_payload_must_be_json;

/// Generates a test to verify that an API that does not expect a payload fails as necessary.
#[macro_export]
macro_rules! test_payload_must_be_empty {
    ( $app:expr, $route:expr $(, $query:expr)? ) => {
        #[tokio::test]
        async fn test_payload_must_be_empty() {
            $crate::rest::testutils::OneShotBuilder::new($app, $route)
                $( .with_query($query) )?
                .send_text("should not be here")
                .await
                .expect_status(axum::http::StatusCode::PAYLOAD_TOO_LARGE)
                .expect_error($crate::rest::Code::TOO_LARGE, "should be empty")
                .await;
        }
    };
}

pub use test_payload_must_be_empty;
