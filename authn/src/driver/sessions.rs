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

//! In-memory store of live sessions backed by the `sessions` table.

use crate::model::Session;
use futures::lock::Mutex;
use log::{info, warn};
use lru_time_cache::LruCache;
use restforge_core::clocks::Clock;
use restforge_core::database::Database;
use restforge_core::driver::DriverResult;
use std::sync::Arc;
use std::time::Duration;

/// Live sessions keyed by user identifier.
///
/// The store has no size bound.  Entries expire once `ttl` has passed since the session was
/// created, as measured by the clock, and reading an entry does not extend its life.  Whenever an
/// entry leaves the store, whether because it expired or because it was removed, its persisted
/// row is purged.  Mutations are serialized by holding the store lock across the database writes.
#[derive(Clone)]
pub struct SessionStore {
    /// Storage for session rows.
    db: Database<Session>,

    /// Clock used to decide whether a session has expired.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Lifetime of a session counted from its creation.
    ttl: Duration,

    /// Live sessions.
    cache: Arc<Mutex<LruCache<String, Session>>>,
}

impl SessionStore {
    /// Creates a store over `db` whose entries expire `ttl` after their creation.
    pub fn new(db: Database<Session>, clock: Arc<dyn Clock + Send + Sync>, ttl: Duration) -> Self {
        let cache = LruCache::with_expiry_duration(ttl);
        Self { db, clock, ttl, cache: Arc::from(Mutex::from(cache)) }
    }

    /// Returns true if `session` has outlived the store's lifetime.
    fn is_expired(&self, session: &Session) -> bool {
        match session.base.created_at {
            Some(created_at) => self.clock.now_utc() - created_at >= self.ttl,
            None => false,
        }
    }

    /// Physically deletes the rows of the `evicted` sessions.
    async fn purge(&self, evicted: Vec<(String, Session)>) {
        if evicted.is_empty() {
            return;
        }
        let sessions = evicted.into_iter().map(|(_, s)| s).collect::<Vec<_>>();
        match self.db.with_purge(true).delete(&sessions).await {
            Ok(n) => info!("Purged {} expired sessions", n),
            Err(e) => warn!("Failed to purge {} expired sessions: {}", sessions.len(), e),
        }
    }

    /// Physically deletes all rows of `user_id`.
    async fn purge_user(&self, user_id: &str) -> DriverResult<u64> {
        let sample = Session { user_id: user_id.to_owned(), ..Default::default() };
        let mut rows = vec![];
        self.db.with_query(&sample, false).list(&mut rows, &mut vec![]).await?;
        Ok(self.db.with_purge(true).delete(&rows).await?)
    }

    /// Loads all live persisted sessions into the store and returns how many were loaded.
    ///
    /// Rows of sessions that expired while the store was not running are purged.
    pub async fn warm(&self) -> DriverResult<usize> {
        let mut rows = vec![];
        self.db.with_order("created_at ASC").list(&mut rows, &mut vec![]).await?;
        let (expired, live): (Vec<_>, Vec<_>) = rows.into_iter().partition(|s| self.is_expired(s));
        let count = live.len();

        let mut cache = self.cache.lock().await;
        for session in live {
            cache.insert(session.user_id.clone(), session);
        }
        drop(cache);
        self.purge(expired.into_iter().map(|s| (s.user_id.clone(), s)).collect()).await;
        Ok(count)
    }

    /// Persists `session` as the only session of `user_id` and records it in the store.
    ///
    /// Returns the session as persisted, with its identifier assigned.
    pub async fn set(&self, user_id: &str, session: Session) -> DriverResult<Session> {
        let mut cache = self.cache.lock().await;

        self.purge_user(user_id).await?;
        let mut sessions = [session];
        self.db.create(&mut sessions).await?;
        let [session] = sessions;

        let (_, evicted) = cache.notify_insert(user_id.to_owned(), session.clone());
        drop(cache);
        self.purge(evicted).await;
        Ok(session)
    }

    /// Returns the live session of `user_id`, if any.  Does not touch storage except to purge
    /// the session when it has expired.
    pub async fn get(&self, user_id: &str) -> Option<Session> {
        let mut cache = self.cache.lock().await;
        let session = cache.peek(user_id).cloned()?;
        if !self.is_expired(&session) {
            return Some(session);
        }

        cache.remove(user_id);
        if let Err(e) = self.purge_user(user_id).await {
            warn!("Failed to purge expired session of {}: {}", user_id, e);
        }
        None
    }

    /// Removes the session of `user_id` and purges all of its persisted rows.
    pub async fn remove(&self, user_id: &str) -> DriverResult<()> {
        let mut cache = self.cache.lock().await;
        cache.remove(user_id);
        self.purge_user(user_id).await?;
        Ok(())
    }
}
