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

//! Operations on many records at once.

use crate::driver::delete::clean_ids;
use crate::driver::{Resource, encode_all, invalid_input, merge, to_json};
use crate::model::{BatchRequest, BatchResponse, failed_item};
use crate::service::ServiceContext;
use restforge_audit::model::AuditParams;
use restforge_core::driver::{DriverError, DriverResult};
use restforge_core::model::Model;
use serde_json::Value;

/// Kind of write performed by a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Stage {
    /// Items are new records.
    Create,

    /// Items are full records that replace existing ones.
    Update,

    /// Items are partial records merged into existing ones.
    Patch,

    /// Items are identifiers, or records carrying them, to delete with the given purge choice.
    Delete(Option<bool>),
}

/// Returns the identifier carried by a batch `item`, which is empty if there is none.
fn item_id(item: &Value) -> &str {
    match item {
        Value::String(id) => id,
        item => item.get("id").and_then(Value::as_str).unwrap_or(""),
    }
}

impl<M: Model> Resource<M> {
    /// Performs `stage` on all of `items` as a unit and returns the processed items.
    async fn run(
        &self,
        ctx: &ServiceContext,
        stage: Stage,
        items: &[Value],
    ) -> DriverResult<Vec<Value>> {
        match stage {
            Stage::Create => {
                let mut records = items
                    .iter()
                    .map(|item| serde_json::from_value::<M>(item.clone()).map_err(invalid_input))
                    .collect::<DriverResult<Vec<M>>>()?;
                self.create_all(ctx, &mut records).await?;
                encode_all(&records)
            }

            Stage::Update | Stage::Patch => {
                let mut records = Vec::with_capacity(items.len());
                let mut olds = Vec::with_capacity(items.len());
                for item in items {
                    let old = self.read_back(item_id(item)).await?;
                    let record = if stage == Stage::Update {
                        serde_json::from_value::<M>(item.clone()).map_err(invalid_input)?
                    } else {
                        merge(&old, item)?
                    };
                    records.push(record);
                    olds.push(old);
                }
                if stage == Stage::Update {
                    self.update_all(ctx, &mut records, &olds).await?;
                } else {
                    self.update_partial_all(ctx, &mut records, &olds).await?;
                }
                encode_all(&records)
            }

            Stage::Delete(purge) => {
                let ids =
                    items.iter().map(|item| item_id(item).to_owned()).collect::<Vec<String>>();
                if ids.iter().any(|id| id.trim().is_empty()) {
                    return Err(DriverError::InvalidInput("Missing record id".to_owned()));
                }
                let mut stubs = Self::stubs(&clean_ids(ids));
                self.delete_all(ctx, &mut stubs, purge).await?;
                Ok(items.to_vec())
            }
        }
    }

    /// Performs `stage` on the items of `request`, either as a unit or item by item.
    async fn batch(
        self,
        ctx: &ServiceContext,
        stage: Stage,
        request: BatchRequest,
    ) -> DriverResult<BatchResponse> {
        let response = if request.options.atomic {
            BatchResponse::new(self.run(ctx, stage, &request.items).await?, 0)
        } else {
            let mut items = Vec::with_capacity(request.items.len());
            let mut failed = 0;
            for item in &request.items {
                match self.run(ctx, stage, std::slice::from_ref(item)).await {
                    Ok(mut done) => items.append(&mut done),
                    Err(e) => {
                        ctx.logger().warn(format_args!("Item {} failed: {}", item_id(item), e));
                        failed += 1;
                        items.push(failed_item(item_id(item), &e.to_string()));
                    }
                }
            }
            BatchResponse::new(items, failed)
        };
        ctx.logger().debug(format_args!(
            "Processed {} items with {} failures",
            response.summary.total, response.summary.failed
        ));

        let ids = response
            .items
            .iter()
            .filter(|item| item.get("error").is_none())
            .map(item_id)
            .filter(|id| !id.is_empty())
            .collect::<Vec<&str>>();
        let params = AuditParams {
            record_id: ids.join(","),
            request: to_json(&request.items),
            response: to_json(&response.summary),
            ..Default::default()
        };
        self.audit(ctx, params).await?;
        Ok(response)
    }

    /// Creates the records in `request`.
    pub async fn batch_create(
        self,
        ctx: &ServiceContext,
        request: BatchRequest,
    ) -> DriverResult<BatchResponse> {
        self.batch(ctx, Stage::Create, request).await
    }

    /// Replaces the records in `request`, which must carry their identifiers.
    pub async fn batch_update(
        self,
        ctx: &ServiceContext,
        request: BatchRequest,
    ) -> DriverResult<BatchResponse> {
        self.batch(ctx, Stage::Update, request).await
    }

    /// Merges the partial records in `request`, which must carry their identifiers.
    pub async fn batch_update_partial(
        self,
        ctx: &ServiceContext,
        request: BatchRequest,
    ) -> DriverResult<BatchResponse> {
        self.batch(ctx, Stage::Patch, request).await
    }

    /// Deletes the records in `request`, which are identifiers or objects with an `id`.
    pub async fn batch_delete(
        self,
        ctx: &ServiceContext,
        request: BatchRequest,
    ) -> DriverResult<BatchResponse> {
        let purge = request.options.purge;
        self.batch(ctx, Stage::Delete(purge), request).await
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::testutils::*;
    use crate::model::{BatchOptions, BatchRequest, BatchSummary};
    use http::StatusCode;
    use restforge_audit::model::Operation;
    use restforge_core::driver::DriverError;
    use restforge_core::model::Model;
    use serde_json::{Value, json};

    fn request(items: Vec<Value>, atomic: bool) -> BatchRequest {
        BatchRequest { items, options: BatchOptions { atomic, purge: None }, summary: None }
    }

    #[tokio::test]
    async fn test_batch_create_atomic() {
        let context = TestContext::setup().await;
        let ctx = context.ctx(Operation::BatchCreate);

        let items = vec![json!({"title": "a"}), json!({"title": "b", "priority": 3})];
        let response = context.resource().batch_create(&ctx, request(items, true)).await.unwrap();
        assert_eq!(BatchSummary { total: 2, succeeded: 2, failed: 0 }, response.summary);
        assert_eq!(2, context.count_notes().await);
        assert_eq!(Some("tester"), response.items[1]["created_by"].as_str());
        assert_eq!(Some(3), response.items[1]["priority"].as_i64());
        assert_eq!(
            vec!["create_before:2".to_owned(), "create_after:2".to_owned()],
            context.hooks().take().await
        );

        let logs = context.audit_logs().await;
        assert_eq!(1, logs.len());
        assert_eq!("batch_create", logs[0].op);
        assert_eq!(2, logs[0].record_id.split(',').count());
    }

    #[tokio::test]
    async fn test_batch_create_atomic_fails_as_a_whole() {
        let context = TestContext::setup().await;
        let ctx = context.ctx(Operation::BatchCreate);

        let items = vec![json!({"title": "a"}), json!({"title": ""})];
        match context.resource().batch_create(&ctx, request(items, true)).await {
            Err(DriverError::Failure(msg)) => assert_eq!("Notes need a title", msg),
            r => panic!("Unexpected result {:?}", r),
        }
        assert_eq!(0, context.count_notes().await);

        let items = vec![json!({"title": "a"}), json!({"title": 5})];
        match context.resource().batch_create(&ctx, request(items, true)).await {
            Err(DriverError::InvalidInput(_)) => (),
            r => panic!("Unexpected result {:?}", r),
        }
        assert_eq!(0, context.count_notes().await);
        assert!(context.audit_logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_create_partial_failures() {
        let context = TestContext::setup().await;
        let ctx = context.ctx(Operation::BatchCreate);

        let items =
            vec![json!({"title": "a"}), json!({"id": "x", "title": ""}), json!({"title": "c"})];
        let response = context.resource().batch_create(&ctx, request(items, false)).await.unwrap();
        assert_eq!(BatchSummary { total: 3, succeeded: 2, failed: 1 }, response.summary);
        assert_eq!(json!({"id": "x", "error": "Notes need a title"}), response.items[1]);
        assert_eq!(Some("c"), response.items[2]["title"].as_str());
        assert_eq!(2, context.count_notes().await);
    }

    #[tokio::test]
    async fn test_batch_update() {
        let context = TestContext::setup().await;
        let notes = context.insert_notes(&["a", "b"]).await;
        context.advance_secs(10);
        let ctx = context.ctx(Operation::BatchUpdate);

        let items = vec![
            json!({"id": notes[0].id(), "title": "a2"}),
            json!({"id": "missing", "title": "x"}),
            json!({"id": notes[1].id(), "title": "b2"}),
        ];
        let response =
            context.resource().batch_update(&ctx, request(items.clone(), false)).await.unwrap();
        assert_eq!(BatchSummary { total: 3, succeeded: 2, failed: 1 }, response.summary);
        assert_eq!(Some("missing"), response.items[1]["id"].as_str());
        assert!(response.items[1]["error"].as_str().unwrap().contains("not found"));

        let updated = context.get_note(notes[0].id()).await.unwrap();
        assert_eq!("a2", updated.title);
        assert_eq!(notes[0].created_at(), updated.created_at());
        assert_eq!(Some(context.now()), updated.updated_at());

        match context.resource().batch_update(&ctx, request(items, true)).await {
            Err(DriverError::NotFound(_)) => (),
            r => panic!("Unexpected result {:?}", r),
        }
    }

    #[tokio::test]
    async fn test_batch_update_partial() {
        let context = TestContext::setup().await;
        let notes = context.insert_notes(&["a", "b"]).await;
        let ctx = context.ctx(Operation::BatchUpdatePartial);

        let items = vec![
            json!({"id": notes[0].id(), "priority": 7}),
            json!({"id": notes[1].id(), "done": true}),
        ];
        let response =
            context.resource().batch_update_partial(&ctx, request(items, true)).await.unwrap();
        assert_eq!(BatchSummary { total: 2, succeeded: 2, failed: 0 }, response.summary);

        let first = context.get_note(notes[0].id()).await.unwrap();
        assert_eq!(("a", 7, false), (first.title.as_str(), first.priority, first.done));
        let second = context.get_note(notes[1].id()).await.unwrap();
        assert_eq!(("b", 0, true), (second.title.as_str(), second.priority, second.done));
        assert_eq!(
            vec!["update_partial_before:2".to_owned(), "update_partial_after:2".to_owned()],
            context.hooks().take().await
        );
    }

    #[tokio::test]
    async fn test_batch_delete() {
        let context = TestContext::setup().await;
        let notes = context.insert_notes(&["a", "b", "c"]).await;
        let ctx = context.ctx(Operation::BatchDelete);

        let items = vec![json!(notes[0].id()), json!({"id": notes[1].id()})];
        let response = context.resource().batch_delete(&ctx, request(items, true)).await.unwrap();
        assert_eq!(BatchSummary { total: 2, succeeded: 2, failed: 0 }, response.summary);
        assert_eq!(1, context.count_notes().await);
        assert_eq!(
            vec!["delete_before:2".to_owned(), "delete_after:2".to_owned()],
            context.hooks().take().await
        );

        let items = vec![json!({"title": "no id"}), json!(notes[2].id())];
        let response = context.resource().batch_delete(&ctx, request(items, false)).await.unwrap();
        assert_eq!(BatchSummary { total: 2, succeeded: 1, failed: 1 }, response.summary);
        assert_eq!(json!({"id": "", "error": "Missing record id"}), response.items[0]);
        assert_eq!(0, context.count_notes().await);
    }

    #[tokio::test]
    async fn test_batch_service_status_is_kept() {
        let context = TestContext::setup().await;
        context.hooks().fail_at("create_before", Some(StatusCode::CONFLICT)).await;
        let ctx = context.ctx(Operation::BatchCreate);

        let items = vec![json!({"title": "a"})];
        match context.resource().batch_create(&ctx, request(items, true)).await {
            Err(DriverError::WithStatus(StatusCode::CONFLICT, msg)) => {
                assert_eq!("create_before rejected the request", msg)
            }
            r => panic!("Unexpected result {:?}", r),
        }
    }

    #[tokio::test]
    async fn test_batch_after_hook_failure_undoes_writes() {
        let context = TestContext::setup().await;

        context.hooks().fail_at("create_after", Some(StatusCode::CONFLICT)).await;
        let ctx = context.ctx(Operation::BatchCreate);
        let items = vec![json!({"title": "a"}), json!({"title": "b"})];
        match context.resource().batch_create(&ctx, request(items, true)).await {
            Err(DriverError::WithStatus(StatusCode::CONFLICT, _)) => (),
            r => panic!("Unexpected result {:?}", r),
        }
        assert_eq!(0, context.count_notes().await);

        let notes = context.insert_notes(&["a", "b"]).await;
        context.hooks().fail_at("update_after", Some(StatusCode::CONFLICT)).await;
        let ctx = context.ctx(Operation::BatchUpdate);
        let items = vec![
            json!({"id": notes[0].id(), "title": "a2"}),
            json!({"id": notes[1].id(), "title": "b2"}),
        ];
        match context.resource().batch_update(&ctx, request(items, true)).await {
            Err(DriverError::WithStatus(StatusCode::CONFLICT, _)) => (),
            r => panic!("Unexpected result {:?}", r),
        }
        assert_eq!("a", context.get_note(notes[0].id()).await.unwrap().title);
        assert_eq!("b", context.get_note(notes[1].id()).await.unwrap().title);

        context.hooks().fail_at("delete_after", Some(StatusCode::CONFLICT)).await;
        let ctx = context.ctx(Operation::BatchDelete);
        let items = vec![json!(notes[0].id()), json!(notes[1].id())];
        match context.resource().batch_delete(&ctx, request(items, true)).await {
            Err(DriverError::WithStatus(StatusCode::CONFLICT, _)) => (),
            r => panic!("Unexpected result {:?}", r),
        }
        assert_eq!(2, context.count_notes().await);
        assert!(context.audit_logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_empty() {
        let context = TestContext::setup().await;
        let ctx = context.ctx(Operation::BatchCreate);
        let response = context.resource().batch_create(&ctx, request(vec![], false)).await.unwrap();
        assert!(response.items.is_empty());
        assert_eq!(BatchSummary::default(), response.summary);
    }
}
