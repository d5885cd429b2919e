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

//! Extension points for domain logic.

use async_trait::async_trait;
use http::StatusCode;
use mime::Mime;
use restforge_audit::model::Operation;
use restforge_core::context::{DatabaseContext, RequestContext, RequestLogger};
use restforge_core::driver::DriverError;
use restforge_core::model::Model;
use restforge_core::rest::RestError;
use serde_json::Value;

/// Error returned by services to abort an operation.
///
/// Errors without a status are reported as failures with the default status of the failure code.
/// Errors with a status are reported with that status.
#[derive(Debug, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    /// HTTP status to respond with, if the service wants to choose it.
    pub status: Option<StatusCode>,

    /// Description of the problem.
    pub message: String,
}

impl ServiceError {
    /// Creates an error reported with the default status.
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self { status: None, message: message.into() }
    }

    /// Creates an error reported with `status`.
    pub fn with_status<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self { status: Some(status), message: message.into() }
    }
}

impl From<DriverError> for ServiceError {
    fn from(e: DriverError) -> Self {
        let message = e.to_string();
        let (_, status) = RestError::from(e).code_and_status();
        Self { status: Some(status), message }
    }
}

impl From<ServiceError> for DriverError {
    fn from(e: ServiceError) -> Self {
        match e.status {
            Some(status) => DriverError::WithStatus(status, e.message),
            None => DriverError::Failure(e.message),
        }
    }
}

/// Result type for services.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Information about the operation a service hook is invoked for.
#[derive(Clone, Debug, Default)]
pub struct ServiceContext {
    /// Context of the HTTP request.
    pub request: RequestContext,

    /// Name of the resource, which is also the path it is mounted at.
    pub route: String,

    /// Operation being performed.
    pub operation: Operation,
}

impl ServiceContext {
    /// Creates the context for `operation` on the resource `route` within `request`.
    pub fn new(request: RequestContext, route: &str, operation: Operation) -> Self {
        Self { request, route: route.to_owned(), operation }
    }

    /// Returns the name of the caller.
    pub fn username(&self) -> &str {
        &self.request.username
    }

    /// Returns the view of this context handed to model hooks and the storage layer.
    pub fn database_context(&self) -> DatabaseContext {
        self.request.database_context(&self.route)
    }

    /// Returns a logger whose lines identify this operation and its request.
    pub fn logger(&self) -> RequestLogger {
        RequestLogger::new(&self.request, &format!("{}/{}", self.route, self.operation))
    }
}

/// Domain logic attached to the resource of records of type `M`.
///
/// All hooks default to doing nothing.  Hooks that run before the storage operation can modify
/// the records and abort the operation; hooks that run after it can modify the records returned
/// to the caller and fail the request.
#[async_trait]
pub trait Service<M: Model>: Send + Sync {
    /// Invoked before creating `items`.
    async fn create_before(&self, _ctx: &ServiceContext, _items: &mut [M]) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked after creating `items`.
    async fn create_after(&self, _ctx: &ServiceContext, _items: &mut [M]) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked before deleting `items`, which only carry their identifiers.
    async fn delete_before(&self, _ctx: &ServiceContext, _items: &mut [M]) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked after deleting `items`.
    async fn delete_after(&self, _ctx: &ServiceContext, _items: &mut [M]) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked before replacing `items`.
    async fn update_before(&self, _ctx: &ServiceContext, _items: &mut [M]) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked after replacing `items`.
    async fn update_after(&self, _ctx: &ServiceContext, _items: &mut [M]) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked before writing the merged `items` of a partial update.
    async fn update_partial_before(
        &self,
        _ctx: &ServiceContext,
        _items: &mut [M],
    ) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked after writing the merged `items` of a partial update.
    async fn update_partial_after(
        &self,
        _ctx: &ServiceContext,
        _items: &mut [M],
    ) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked before listing with the equality predicates in `query`.
    async fn list_before(&self, _ctx: &ServiceContext, _query: &mut M) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked after listing `items`.  Not invoked when the result comes from the cache.
    async fn list_after(&self, _ctx: &ServiceContext, _items: &mut [M]) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked before fetching the record identified by `id`.
    async fn get_before(&self, _ctx: &ServiceContext, _id: &str) -> ServiceResult<()> {
        Ok(())
    }

    /// Invoked after fetching `item`.  Not invoked when the result comes from the cache.
    async fn get_after(&self, _ctx: &ServiceContext, _item: &mut M) -> ServiceResult<()> {
        Ok(())
    }

    /// Adds equality predicates to the list query by setting fields of `query`.
    async fn filter(&self, _ctx: &ServiceContext, _query: &mut M) -> ServiceResult<()> {
        Ok(())
    }

    /// Returns a raw predicate to add to the list query, referencing fields as `{name}` and
    /// arguments as `?`.
    async fn filter_raw(
        &self,
        _ctx: &ServiceContext,
    ) -> ServiceResult<Option<(String, Vec<Value>)>> {
        Ok(None)
    }

    /// Serializes `items` for download.  Defaults to a JSON array.
    async fn export(&self, _ctx: &ServiceContext, items: &[M]) -> ServiceResult<Vec<u8>> {
        serde_json::to_vec_pretty(items).map_err(|e| ServiceError::new(e.to_string()))
    }

    /// Parses uploaded `data` of the sniffed `content_type` into records.  Defaults to accepting
    /// JSON arrays.
    async fn import(
        &self,
        _ctx: &ServiceContext,
        content_type: &Mime,
        data: &[u8],
    ) -> ServiceResult<Vec<M>> {
        if *content_type != mime::APPLICATION_JSON {
            return Err(ServiceError::with_status(
                StatusCode::BAD_REQUEST,
                format!("Unsupported import format {}", content_type),
            ));
        }
        serde_json::from_slice(data).map_err(|e| {
            let message = format!("Invalid import file: {}", e);
            ServiceError::with_status(StatusCode::BAD_REQUEST, message)
        })
    }
}

/// A service without domain logic.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoService;

impl<M: Model> Service<M> for NoService {}
