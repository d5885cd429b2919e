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

//! Test utilities for the generic operations.

use crate::driver::Resource;
use crate::service::{Service, ServiceContext, ServiceError, ServiceResult};
use async_trait::async_trait;
use futures::lock::Mutex;
use restforge_audit::driver::{AuditOptions, AuditRecorder};
use restforge_audit::model::{AuditLog, Operation};
use restforge_core::clocks::testutils::SettableClock;
use restforge_core::clocks::Clock;
use restforge_core::context::RequestContext;
use restforge_core::database::Database;
use restforge_core::db::Db;
use restforge_core::model::Model;
use restforge_core::model::testutils::{Note, Tag};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;

/// Service that records the hooks it sees and that can be told to fail one of them.
#[derive(Clone, Default)]
pub struct HookLog {
    /// Names of the invoked hooks, in order.
    calls: Arc<Mutex<Vec<String>>>,

    /// Name of the hook that fails, if any.
    fail_at: Arc<Mutex<Option<(String, Option<http::StatusCode>)>>>,
}

impl HookLog {
    /// Returns the names of the hooks invoked so far and forgets them.
    pub async fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().await)
    }

    /// Makes the hook `name` fail, optionally with an explicit `status`.
    pub async fn fail_at(&self, name: &str, status: Option<http::StatusCode>) {
        *self.fail_at.lock().await = Some((name.to_owned(), status));
    }

    /// Records the invocation of `name` on `n` items and fails if configured to.
    async fn call(&self, name: &str, n: usize) -> ServiceResult<()> {
        self.calls.lock().await.push(format!("{}:{}", name, n));
        match &*self.fail_at.lock().await {
            Some((fail, status)) if fail == name => Err(ServiceError {
                status: *status,
                message: format!("{} rejected the request", name),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<M: Model> Service<M> for HookLog {
    async fn create_before(&self, _ctx: &ServiceContext, items: &mut [M]) -> ServiceResult<()> {
        self.call("create_before", items.len()).await
    }

    async fn create_after(&self, _ctx: &ServiceContext, items: &mut [M]) -> ServiceResult<()> {
        self.call("create_after", items.len()).await
    }

    async fn delete_before(&self, _ctx: &ServiceContext, items: &mut [M]) -> ServiceResult<()> {
        self.call("delete_before", items.len()).await
    }

    async fn delete_after(&self, _ctx: &ServiceContext, items: &mut [M]) -> ServiceResult<()> {
        self.call("delete_after", items.len()).await
    }

    async fn update_before(&self, _ctx: &ServiceContext, items: &mut [M]) -> ServiceResult<()> {
        self.call("update_before", items.len()).await
    }

    async fn update_after(&self, _ctx: &ServiceContext, items: &mut [M]) -> ServiceResult<()> {
        self.call("update_after", items.len()).await
    }

    async fn update_partial_before(
        &self,
        _ctx: &ServiceContext,
        items: &mut [M],
    ) -> ServiceResult<()> {
        self.call("update_partial_before", items.len()).await
    }

    async fn update_partial_after(
        &self,
        _ctx: &ServiceContext,
        items: &mut [M],
    ) -> ServiceResult<()> {
        self.call("update_partial_after", items.len()).await
    }

    async fn list_before(&self, _ctx: &ServiceContext, _query: &mut M) -> ServiceResult<()> {
        self.call("list_before", 1).await
    }

    async fn list_after(&self, _ctx: &ServiceContext, items: &mut [M]) -> ServiceResult<()> {
        self.call("list_after", items.len()).await
    }

    async fn get_before(&self, _ctx: &ServiceContext, _id: &str) -> ServiceResult<()> {
        self.call("get_before", 1).await
    }

    async fn get_after(&self, _ctx: &ServiceContext, _item: &mut M) -> ServiceResult<()> {
        self.call("get_after", 1).await
    }
}

/// State of a test of the operations on notes.
pub struct TestContext {
    /// Clock used by the storage layer and the audit recorder.
    clock: Arc<SettableClock>,

    /// The operations under test.
    resource: Resource<Note>,

    /// Service attached to the resource.
    hooks: HookLog,

    /// Storage of the audit entries.
    audit_db: Database<AuditLog>,

    /// Storage of the tags that notes can refer to.
    tags: Database<Tag>,
}

impl TestContext {
    /// Initializes a resource over notes backed by an in-memory database with synchronous audit.
    pub async fn setup() -> Self {
        let db: Arc<dyn Db + Send + Sync> =
            Arc::from(restforge_core::db::sqlite::testutils::setup().await);
        let clock = Arc::from(SettableClock::new(datetime!(2023-06-01 10:00:00 UTC)));
        Self::setup_with(db, clock).await
    }

    /// Initializes the test context using the given already-initialized objects.
    pub async fn setup_with(db: Arc<dyn Db + Send + Sync>, clock: Arc<SettableClock>) -> Self {
        let dyn_clock: Arc<dyn Clock + Send + Sync> = clock.clone();

        let audit_db = Database::<AuditLog>::new(db.clone(), dyn_clock.clone());
        let audit_opts = AuditOptions { async_write: false, ..Default::default() };
        let audit =
            AuditRecorder::new(audit_db.clone(), dyn_clock.clone(), Arc::from(audit_opts), 10);
        audit.init().await.unwrap();

        let tags = Database::<Tag>::new(db.clone(), dyn_clock.clone());
        tags.migrate().await.unwrap();

        let notes = Database::<Note>::new(db, dyn_clock);
        notes.migrate().await.unwrap();

        let hooks = HookLog::default();
        let resource = Resource::new("notes", notes, Arc::from(hooks.clone())).with_audit(audit);
        Self { clock, resource, hooks, audit_db, tags }
    }

    /// Returns the operations under test.
    pub fn resource(&self) -> Resource<Note> {
        self.resource.clone()
    }

    /// Returns the service attached to the resource.
    pub fn hooks(&self) -> &HookLog {
        &self.hooks
    }

    /// Returns the current time.
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now_utc()
    }

    /// Advances the clock by `secs` seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    /// Returns a service context for `operation` invoked by `tester`.
    pub fn ctx(&self, operation: Operation) -> ServiceContext {
        let request = RequestContext {
            request_id: "req-test".to_owned(),
            user_id: "tester-id".to_owned(),
            username: "tester".to_owned(),
            method: "POST".to_owned(),
            path: "/notes".to_owned(),
            ..Default::default()
        };
        ServiceContext::new(request, "notes", operation)
    }

    /// Stores notes with the given `titles` directly, bypassing the pipeline.
    pub async fn insert_notes(&self, titles: &[&str]) -> Vec<Note> {
        let mut notes = titles.iter().map(|t| Note::new(t)).collect::<Vec<Note>>();
        self.resource.db().create(&mut notes).await.unwrap();
        notes
    }

    /// Stores a tag with `name` directly and returns it.
    pub async fn insert_tag(&self, name: &str) -> Tag {
        let mut tag = Tag { name: name.to_owned(), ..Default::default() };
        self.tags.create(std::slice::from_mut(&mut tag)).await.unwrap();
        tag
    }

    /// Fetches the live note identified by `id`, if any.
    pub async fn get_note(&self, id: &str) -> Option<Note> {
        let mut note = Note::default();
        self.resource.db().get(&mut note, id, &mut vec![]).await.unwrap();
        if note.base.id.is_empty() { None } else { Some(note) }
    }

    /// Counts the live notes.
    pub async fn count_notes(&self) -> i64 {
        self.resource.db().count().await.unwrap()
    }

    /// Returns all audit entries, oldest first.
    pub async fn audit_logs(&self) -> Vec<AuditLog> {
        let mut logs = vec![];
        self.audit_db.with_order("created_at, id").list(&mut logs, &mut vec![]).await.unwrap();
        logs
    }
}
