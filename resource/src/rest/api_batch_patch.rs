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

//! API to update some fields of many records at once.

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

/// PATCH handler for this API.
pub(crate) async fn handler<M: Model>(
    State(resource): State<Resource<M>>,
    request: RequestContext,
    JsonBody(batch): JsonBody<BatchRequest>,
) -> Result<Response, RestError> {
    let ctx = service_context(&resource, request, Operation::BatchUpdatePartial);
    let response = resource.batch_update_partial(&ctx, batch).await.map_err(|e| fail(&ctx, e))?;
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
        (http::Method::PATCH, "/api/notes/batch".to_owned())
    }

    #[tokio::test]
    async fn test_ok() {
        let context = TestContext::setup().await;
        let notes = context.inner().insert_notes(&["a", "b"]).await;

        let items = json!([{"id": notes[0].id(), "done": true}, {"id": "gone", "done": true}]);
        let response = OneShotBuilder::new(context.app(), route())
            .send_json(json!({"items": items}))
            .await
            .expect_status(http::StatusCode::OK)
            .expect_data::<BatchResponse>()
            .await;
        assert_eq!(BatchSummary { total: 2, succeeded: 1, failed: 1 }, response.summary);
        assert_eq!(Some("gone"), response.items[1]["id"].as_str());

        let patched = context.inner().get_note(notes[0].id()).await.unwrap();
        assert_eq!(("a", true), (patched.title.as_str(), patched.done));
    }

    test_payload_must_be_json!(TestContext::setup().await.app(), route());
}
