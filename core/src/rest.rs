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

//! Generic code for REST handlers.
//!
//! Every API should be put in its own `.rs` file, using a name like `<entity>_<method>.rs`.  This
//! may seem overkill, but putting every API in its own file makes it easy to ensure all the
//! integration tests for the given API truly belong to that API.
//!
//! Responses, including errors, are always wrapped in the envelope defined in `envelope`, and
//! errors are translated to codes from the `codes` table.

use crate::driver::{AuthFailure, DriverError};
use crate::model::ModelError;
use async_trait::async_trait;
use axum::Json;
use axum::body::HttpBody;
use axum::extract::{FromRequest, Request};
use axum::http::header::AsHeaderName;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use http::StatusCode;
use serde::de::DeserializeOwned;
use std::fmt;

mod circuit_breaker;
pub use circuit_breaker::{CircuitBreaker, circuit_breaker};
pub mod codes;
pub use codes::Code;
pub mod envelope;
mod logger;
pub use logger::request_logger;
mod rate_limit;
pub use rate_limit::{RateLimiter, rate_limit};
mod recovery;
pub use recovery::recovery_layer;

/// Frontend errors.  These are the errors that are visible to the user on failed requests.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum RestError {
    /// Indicates that the request conflicts with an existing entity.
    #[error("{0}")]
    AlreadyExists(String),

    /// Indicates that a step of the request rejected it.
    #[error("{0}")]
    Failure(String),

    /// Indicates an authorization problem.
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Catch-all error type for all unexpected errors.
    #[error("{0}")]
    InternalError(String),

    /// Indicates an error in the contents of the request.
    #[error("{0}")]
    InvalidRequest(String),

    /// Indicates that a requested entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Indicates that a request that should have empty content did not.
    #[error("Content should be empty")]
    PayloadNotEmpty,

    /// Indicates that the request payload exceeds the accepted size.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Indicates that the service is refusing requests for a while.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Indicates that the caller exceeded its quota.
    #[error("{0}")]
    TooManyRequests(String),

    /// Indicates an authentication problem.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Code describing the nature of the problem.
        code: Code,

        /// Descriptive message explaining the nature of the problem.
        message: String,
    },

    /// Indicates an error whose status and code were chosen by the business logic.
    #[error("{message}")]
    WithStatus {
        /// HTTP status of the response.
        status: StatusCode,

        /// Code of the response.
        code: Code,

        /// Descriptive message.
        message: String,
    },
}

impl RestError {
    /// Returns the response code and HTTP status for this error.
    pub fn code_and_status(&self) -> (Code, StatusCode) {
        let code = match self {
            RestError::AlreadyExists(_) => Code::ALREADY_EXISTS,
            RestError::Failure(_) => Code::FAILURE,
            RestError::Forbidden(_) => Code::FORBIDDEN,
            RestError::InternalError(_) => {
                return (Code::FAILURE, StatusCode::INTERNAL_SERVER_ERROR);
            }
            RestError::InvalidRequest(_) => Code::INVALID_PARAM,
            RestError::NotFound(_) => Code::NOT_FOUND,
            RestError::PayloadNotEmpty => Code::TOO_LARGE,
            RestError::PayloadTooLarge(_) => Code::TOO_LARGE,
            RestError::ServiceUnavailable(_) => Code::SERVICE_UNAVAILABLE,
            RestError::TooManyRequests(_) => Code::TOO_MANY_REQUESTS,
            RestError::Unauthorized { code, .. } => *code,
            RestError::WithStatus { status, code, .. } => return (*code, *status),
        };
        (code, code.status())
    }
}

impl From<AuthFailure> for Code {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::NeedLogin => Code::NEED_LOGIN,
            AuthFailure::InvalidToken => Code::INVALID_TOKEN,
            AuthFailure::TokenExpired => Code::TOKEN_EXPIRED,
            AuthFailure::InvalidLogin => Code::INVALID_LOGIN,
        }
    }
}

impl From<DriverError> for RestError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::AlreadyExists(_) => RestError::AlreadyExists(e.to_string()),
            DriverError::BackendError(_) => RestError::InternalError(e.to_string()),
            DriverError::Failure(_) => RestError::Failure(e.to_string()),
            DriverError::Forbidden(msg) => RestError::Forbidden(msg),
            DriverError::InvalidInput(_) => RestError::InvalidRequest(e.to_string()),
            DriverError::NotFound(_) => RestError::NotFound(e.to_string()),
            DriverError::Unauthorized(failure, message) => {
                RestError::Unauthorized { code: failure.into(), message }
            }
            DriverError::Unavailable(_) => RestError::ServiceUnavailable(e.to_string()),
            DriverError::WithStatus(status, message) => {
                RestError::WithStatus { status, code: Code::FAILURE, message }
            }
        }
    }
}

impl From<fmt::Error> for RestError {
    fn from(e: fmt::Error) -> Self {
        RestError::InternalError(e.to_string())
    }
}

impl From<ModelError> for RestError {
    fn from(e: ModelError) -> Self {
        RestError::InvalidRequest(e.to_string())
    }
}

impl From<serde_json::Error> for RestError {
    fn from(e: serde_json::Error) -> Self {
        RestError::InvalidRequest(e.to_string())
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> axum::response::Response {
        let (code, status) = self.code_and_status();
        let mut response = envelope::envelope(status, code, self.to_string(), ());
        if let RestError::Unauthorized { .. } = self {
            response
                .headers_mut()
                .insert(http::header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Result type for this module.
pub type RestResult<T> = Result<T, RestError>;

/// A request body extractor that forbids any content.
///
/// Any API that doesn't expect a body should use this to ensure we don't get garbage data that we
/// don't care about.  This future-proofs the service.
pub struct EmptyBody {}

#[async_trait]
impl<S> FromRequest<S> for EmptyBody
where
    S: Send + Sync,
{
    type Rejection = RestError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        if req.into_body().is_end_stream() {
            Ok(EmptyBody {})
        } else {
            Err(RestError::PayloadNotEmpty)
        }
    }
}

/// A JSON body extractor whose failures are reported through the envelope.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = RestError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(e) => Err(RestError::InvalidRequest(e.body_text())),
        }
    }
}

/// Extracts the header `name` from `headers` and ensures it has at most one value.
pub fn get_unique_header<K: AsHeaderName + Copy>(
    headers: &HeaderMap,
    name: K,
) -> RestResult<Option<&HeaderValue>> {
    let mut iter = headers.get_all(name).iter();
    let value = iter.next();
    if iter.next().is_some() {
        return Err(RestError::InvalidRequest(format!(
            "Header {} cannot have more than one value",
            name.as_str()
        )));
    }
    Ok(value)
}

/// Common test code for the REST server.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
