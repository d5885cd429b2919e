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

//! Recording of audit entries.
//!
//! Entries are either written as soon as they are recorded or, in asynchronous mode, pushed into
//! a bounded ring that a background task drains in batches.

use crate::model::{AuditLog, AuditParams, Operation};
use futures::lock::Mutex;
use log::{debug, info, warn};
use restforge_core::clocks::Clock;
use restforge_core::config::{Section, duration};
use restforge_core::context::RequestContext;
use restforge_core::database::Database;
use restforge_core::driver::DriverResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

mod buffer;
pub use buffer::CircularBuffer;
mod filter;
pub use filter::{DEFAULT_SENSITIVE_FIELDS, FieldFilter, record_name, truncate};

/// Configuration for the `audit` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AuditOptions {
    /// Whether anything is audited at all.
    pub enable: bool,

    /// Whether entries are buffered and written in the background.
    pub async_write: bool,

    /// Number of pending entries that triggers a write, and maximum entries per write.
    pub batch_size: usize,

    /// Maximum time pending entries wait before being written.
    #[serde(with = "duration")]
    pub flush_interval: Duration,

    /// Operations to audit.  Empty means all.
    pub operations: Vec<String>,

    /// Tables to audit.  Empty means all.
    pub tables: Vec<String>,

    /// Tables never to audit, even if listed in `tables`.
    pub exclude_tables: Vec<String>,

    /// Fields to drop from payloads on top of the built-in sensitive fields.
    pub exclude_fields: Vec<String>,

    /// If not empty, the only fields kept in payloads.
    pub include_fields: Vec<String>,

    /// Maximum length of each serialized payload.  Zero disables truncation.
    pub max_field_length: usize,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            enable: true,
            async_write: true,
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            operations: vec![],
            tables: vec![],
            exclude_tables: vec![],
            exclude_fields: vec![],
            include_fields: vec![],
            max_field_length: 4096,
        }
    }
}

impl Section for AuditOptions {
    const NAME: &'static str = "audit";
}

/// Returns true if `list` contains `value` ignoring case.
fn contains(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value))
}

/// Persists pending entries.
#[derive(Clone)]
struct Writer {
    /// Storage for entries.
    db: Database<AuditLog>,

    /// Entries waiting to be written.
    buffer: Arc<CircularBuffer<AuditLog>>,

    /// Maximum number of entries per write.
    batch_size: usize,
}

impl Writer {
    /// Writes all pending entries in batches and returns how many were persisted.
    ///
    /// Entries in a batch that fails to persist are lost.
    async fn flush(&self) -> usize {
        let mut written = 0;
        loop {
            let mut batch = self.buffer.drain(self.batch_size);
            let n = batch.len();
            if n == 0 {
                break;
            }
            match self.db.create(&mut batch).await {
                Ok(()) => written += n,
                Err(e) => warn!("Lost {} audit entries: {}", n, e),
            }
            if n < self.batch_size {
                break;
            }
        }
        written
    }
}

/// Handle to the background task that drains the buffer.
struct Drainer {
    /// Tells the task to exit.
    stop: oneshot::Sender<()>,

    /// The task itself.
    handle: JoinHandle<()>,
}

/// Loop of the background task: writes pending entries whenever poked and at least once every
/// `interval`, until told to stop.
async fn drain_loop(
    writer: Writer,
    clock: Arc<dyn Clock + Send + Sync>,
    interval: Duration,
    wakeup: Arc<Notify>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            () = wakeup.notified() => (),
            () = clock.sleep(interval) => (),
        }
        let n = writer.flush().await;
        if n > 0 {
            debug!("Wrote {} audit entries", n);
        }
    }
}

/// Decides what to audit and records it.
#[derive(Clone)]
pub struct AuditRecorder {
    /// Clock used to stamp entries.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Configuration.
    opts: Arc<AuditOptions>,

    /// Sanitizer for payloads.
    filter: Arc<FieldFilter>,

    /// Persistence of entries.
    writer: Writer,

    /// Pokes the background task when a batch is ready.
    wakeup: Arc<Notify>,

    /// The background task, if running.
    drainer: Arc<Mutex<Option<Drainer>>>,
}

impl AuditRecorder {
    /// Creates a recorder that stores entries in `db` and that holds up to `capacity` pending
    /// entries in asynchronous mode.
    pub fn new(
        db: Database<AuditLog>,
        clock: Arc<dyn Clock + Send + Sync>,
        opts: Arc<AuditOptions>,
        capacity: usize,
    ) -> Self {
        let filter = Arc::from(FieldFilter::new(&opts.exclude_fields, &opts.include_fields));
        let writer = Writer {
            db,
            buffer: Arc::from(CircularBuffer::new(capacity)),
            batch_size: opts.batch_size.max(1),
        };
        Self {
            clock,
            opts,
            filter,
            writer,
            wakeup: Arc::default(),
            drainer: Arc::default(),
        }
    }

    /// Creates the table for entries.
    pub async fn init(&self) -> DriverResult<()> {
        self.writer.db.migrate().await?;
        Ok(())
    }

    /// Starts the background task that writes buffered entries.  Does nothing in synchronous
    /// mode or if the task is already running.
    pub async fn start(&self) {
        if !self.opts.enable || !self.opts.async_write {
            return;
        }

        let mut drainer = self.drainer.lock().await;
        if drainer.is_some() {
            return;
        }
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(drain_loop(
            self.writer.clone(),
            self.clock.clone(),
            self.opts.flush_interval,
            self.wakeup.clone(),
            stop_rx,
        ));
        *drainer = Some(Drainer { stop, handle });
        info!(
            "Audit drainer started (batch size {}, flush interval {:?})",
            self.writer.batch_size, self.opts.flush_interval
        );
    }

    /// Returns true if `op` on `table` has to be audited.
    ///
    /// Tables in the deny-list are never audited.  Empty allow-lists allow everything.
    pub fn is_enabled(&self, op: Operation, table: &str) -> bool {
        let opts = &self.opts;
        if !opts.enable {
            return false;
        }
        if !opts.operations.is_empty() && !contains(&opts.operations, op.as_str()) {
            return false;
        }
        if contains(&opts.exclude_tables, table) {
            return false;
        }
        opts.tables.is_empty() || contains(&opts.tables, table)
    }

    /// Filters and serializes an optional payload.
    fn payload(&self, value: Option<&Value>) -> String {
        match value {
            Some(value) => {
                truncate(self.filter.filter(value).to_string(), self.opts.max_field_length)
            }
            None => String::new(),
        }
    }

    /// Builds the entry describing `params` as performed within `ctx`.
    fn build(&self, ctx: &RequestContext, params: AuditParams) -> AuditLog {
        // Named from the unfiltered record so that fields like `email` can still name it.
        let record_name = match params.record_name {
            Some(name) if !name.is_empty() => name,
            _ => params.record.as_ref().map(record_name).unwrap_or_default(),
        };

        let mut log = AuditLog {
            op: params.operation.to_string(),
            table: params.table,
            model: params.model,
            record_id: params.record_id,
            record_name,
            record: self.payload(params.record.as_ref()),
            request: self.payload(params.request.as_ref()),
            response: self.payload(params.response.as_ref()),
            old_record: self.payload(params.old_record.as_ref()),
            new_record: self.payload(params.new_record.as_ref()),
            query_params: self.payload(params.query_params.as_ref()),
            method: ctx.method.clone(),
            uri: ctx.path.clone(),
            ip: ctx.client_ip.clone(),
            user: ctx.username.clone(),
            request_id: ctx.request_id.clone(),
            user_agent: ctx.user_agent.clone(),
            ..Default::default()
        };
        let now = self.clock.now_utc();
        log.base.created_at = Some(now);
        log.base.updated_at = Some(now);
        log.base.created_by = ctx.username.clone();
        log.base.updated_by = ctx.username.clone();
        log
    }

    /// Records the operation described by `params` as performed within `ctx`, if enabled.
    ///
    /// In asynchronous mode the entry is only buffered and this never fails.  In synchronous mode
    /// write errors are returned.
    pub async fn record(&self, ctx: &RequestContext, params: AuditParams) -> DriverResult<()> {
        if !self.is_enabled(params.operation, &params.table) {
            return Ok(());
        }

        let log = self.build(ctx, params);
        if self.opts.async_write {
            let pending = self.writer.buffer.push(log);
            if pending >= self.writer.batch_size {
                self.wakeup.notify_one();
            }
        } else {
            self.writer.db.create(&mut [log]).await?;
        }
        Ok(())
    }

    /// Returns the number of buffered entries.
    pub fn pending(&self) -> usize {
        self.writer.buffer.len()
    }

    /// Writes all buffered entries now and returns how many were persisted.
    pub async fn flush(&self) -> usize {
        self.writer.flush().await
    }

    /// Stops the background task and writes any buffered entries.
    pub async fn close(&self) {
        if let Some(drainer) = self.drainer.lock().await.take() {
            // The task may have exited already, in which case nobody is listening.
            let _ = drainer.stop.send(());
            if let Err(e) = drainer.handle.await {
                warn!("Audit drainer failed: {}", e);
            }
        }

        let n = self.flush().await;
        let dropped = self.writer.buffer.dropped();
        if dropped > 0 {
            warn!("{} audit entries were overwritten before being written", dropped);
        }
        info!("Audit recorder closed after writing {} pending entries", n);
    }
}
