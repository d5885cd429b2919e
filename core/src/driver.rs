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

//! Generic business logic for any service.
//!
//! Every service implements its own driver types.  A driver holds the shared state required by
//! the application (database handle, caches, clocks) and coordinates access to the database:
//!
//! ```rust
//! use restforge_core::clocks::Clock;
//! use restforge_core::db::Db;
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! pub struct Driver {
//!     /// The database that the driver uses for persistence.
//!     db: Arc<dyn Db + Send + Sync>,
//!
//!     /// The clock used to stamp records.
//!     clock: Arc<dyn Clock + Send + Sync>,
//!
//!     // ... other fields here ...
//! }
//! ```
//!
//! Operations implemented in drivers should consume `self` because this is the layer that
//! coordinates multiple operations against the database.  Consuming `self` prevents the caller
//! from easily issuing multiple operations against the driver, as this would require a clone and
//! highlight an undesirable pattern.

use crate::db::DbError;
use crate::model::ModelError;
use http::StatusCode;

/// Reasons for rejecting the identity of a caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AuthFailure {
    /// The request carries no credentials.
    NeedLogin,

    /// The credentials are malformed, revoked or bound to another device.
    InvalidToken,

    /// The credentials were valid but have expired.
    TokenExpired,

    /// The username or password are incorrect.
    InvalidLogin,
}

/// Business logic errors.  These errors encompass backend and logical errors.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// Indicates that a request to create an entry failed because it already exists.
    #[error("{0}")]
    AlreadyExists(String),

    /// Catch-all error type for unexpected database errors.
    #[error("{0}")]
    BackendError(String),

    /// Indicates that a step of the operation rejected the request.
    #[error("{0}")]
    Failure(String),

    /// Indicates that the caller is not allowed to perform the operation.
    #[error("{0}")]
    Forbidden(String),

    /// Indicates an error in the input data.
    #[error("{0}")]
    InvalidInput(String),

    /// Indicates that a requested entry does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Indicates that the identity of the caller could not be established.
    #[error("{1}")]
    Unauthorized(AuthFailure, String),

    /// Indicates that a dependency is temporarily unavailable.
    #[error("{0}")]
    Unavailable(String),

    /// Indicates an error for which the business logic dictates the HTTP status.
    #[error("{1}")]
    WithStatus(StatusCode, String),
}

impl From<DbError> for DriverError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::AlreadyExists => DriverError::AlreadyExists(e.to_string()),
            DbError::BackendError(_) => DriverError::BackendError(e.to_string()),
            DbError::DataIntegrityError(_) => DriverError::BackendError(e.to_string()),
            DbError::InvalidQuery(_) => DriverError::InvalidInput(e.to_string()),
            DbError::NotFound => DriverError::NotFound(e.to_string()),
            DbError::Unavailable => DriverError::Unavailable(e.to_string()),
        }
    }
}

impl From<ModelError> for DriverError {
    fn from(e: ModelError) -> Self {
        DriverError::Failure(e.to_string())
    }
}

/// Result type for this module.
pub type DriverResult<T> = Result<T, DriverError>;
