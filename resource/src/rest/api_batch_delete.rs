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

//! API to delete many records at once with per-item reporting.

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

/// DELETE handler for this API.
pub(crate) async fn handler<M: Model>(
    State(resource): State<Resource<M>>,
    request: RequestContext,
    JsonBody(batch): JsonBody<BatchRequest>,
) -> Result<Response, RestError> {
    let ctx = service_context(&resource, request, Operation::BatchDelete);
    let response = resource.batch_delete(&ctx, batch).await.map_err(|e| fail(&ctx, e))?;
    Ok(success(StatusCode::OK, response))
}

#[cfg(test)]
mod tests {
    use crate::model::{BatchResponse, BatchSummary};
    use crate::rest::testutils::*;
    use axum::http;
    use restforge_core::model::Model;
    use restforge_core::rest::testutils::OneShotBuilder;
    use restforge_core::test_payload_must_be_json;
    use serde_json::json;

    fn route() -> (http::Method, String) {
        (http::Method::DELETE, "/api/notes/batch".to_owned())
    }

    #[tokio::test]
    async fn test_ok() {
        let context = TestContext::setup().await;
        let notes = context.inner().insert_notes(&["a", "b", "c"]).await;

        let items = json!([notes[0].id(), {"id": notes[1].id()}]);
        let response = OneShotBuilder::new(context.app(), route())
            .send_json(json!({"items": items, "options": {"atomic": true, "purge": true}}))
            .await
            .expect_status(http::StatusCode::OK)
            .expect_data::<BatchResponse>()
            .await;
        assert_eq!(BatchSummary { total: 2, succeeded: 2, failed: 0 }, response.summary);
        assert_eq!(1, context.inner().count_notes().await);
        assert_eq!(0, context.inner().resource().db().cleanup().await.unwrap());
    }

    test_payload_must_be_json!(TestContext::setup().await.app(), route());
}
