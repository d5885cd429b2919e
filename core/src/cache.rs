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

//! Caching of serialized query results.
//!
//! Cache keys are scoped by a per-table generation number.  Writes to a table bump its generation,
//! which makes all previously-cached lists and gets for that table unreachable without having to
//! enumerate them.  Stale entries then age out through the LRU and TTL policies.

use crate::config::{Section, duration};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::lock::Mutex;
use lru_time_cache::LruCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default maximum amount of time to keep cached entries in memory.
const DEFAULT_TTL_SECONDS: u64 = 5 * 60;

/// Default maximum number of entries to keep cached in memory.
const DEFAULT_CAPACITY: usize = 10 * 1024;

/// Configuration for the `cache` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Whether query results are cached at all.
    pub enable: bool,

    /// The cache capacity in number of entries.
    pub capacity: usize,

    /// The TTL for the entries in the cache.
    #[serde(with = "duration")]
    pub ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        let ttl = Duration::from_secs(DEFAULT_TTL_SECONDS);
        Self { enable: true, capacity: DEFAULT_CAPACITY, ttl }
    }
}

impl Section for CacheOptions {
    const NAME: &'static str = "cache";
}

/// Storage for serialized query results.
#[async_trait]
pub trait Cache {
    /// Returns the current generation of `table`.
    async fn generation(&self, table: &str) -> u64;

    /// Invalidates everything cached for `table`.
    async fn invalidate(&self, table: &str);

    /// Looks up `key`.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key`.
    async fn set(&self, key: &str, value: Vec<u8>);
}

/// Builds the key for a cached query on `table` at `generation`.
pub fn scoped_key(table: &str, generation: u64, query: &str) -> String {
    format!("{}@{}:{}", table, generation, query)
}

/// In-process cache with LRU eviction and a TTL.
#[derive(Clone)]
pub struct MemoryCache {
    /// Cached payloads.
    entries: Arc<Mutex<LruCache<String, Vec<u8>>>>,

    /// Current generation of each table.  Tables that were never written to are at zero.
    generations: Arc<DashMap<String, u64>>,
}

impl MemoryCache {
    /// Creates a new cache configured with `opts`.
    pub fn new(opts: &CacheOptions) -> Self {
        let entries = LruCache::with_expiry_duration_and_capacity(opts.ttl, opts.capacity);
        Self { entries: Arc::from(Mutex::from(entries)), generations: Arc::default() }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn generation(&self, table: &str) -> u64 {
        self.generations.get(table).map(|g| *g).unwrap_or(0)
    }

    async fn invalidate(&self, table: &str) {
        *self.generations.entry(table.to_owned()).or_insert(0) += 1;
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().await;
        entries.get(key).cloned()
    }

    async fn set(&self, key: &str, value: Vec<u8>) {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache() -> MemoryCache {
        MemoryCache::new(&CacheOptions {
            enable: true,
            capacity: 2,
            ttl: Duration::from_secs(1000000),
        })
    }

    #[tokio::test]
    async fn test_get_set() {
        let cache = small_cache();
        assert_eq!(None, cache.get("k").await);
        cache.set("k", b"value".to_vec()).await;
        assert_eq!(Some(b"value".to_vec()), cache.get("k").await);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = small_cache();
        cache.set("a", vec![1]).await;
        cache.set("b", vec![2]).await;
        cache.get("a").await;
        cache.set("c", vec![3]).await;

        assert_eq!(Some(vec![1]), cache.get("a").await);
        assert_eq!(None, cache.get("b").await);
        assert_eq!(Some(vec![3]), cache.get("c").await);
    }

    #[tokio::test]
    async fn test_invalidate_bumps_generation() {
        let cache = small_cache();
        assert_eq!(0, cache.generation("notes").await);

        let before = scoped_key("notes", cache.generation("notes").await, "list");
        cache.set(&before, vec![1]).await;

        cache.invalidate("notes").await;
        assert_eq!(1, cache.generation("notes").await);
        assert_eq!(0, cache.generation("tags").await);

        let after = scoped_key("notes", cache.generation("notes").await, "list");
        assert_ne!(before, after);
        assert_eq!(None, cache.get(&after).await);
    }

    #[test]
    fn test_options_from_config() {
        temp_env::with_vars([("CACHE_TTL", Some("1h")), ("CACHE_CAPACITY", Some("64"))], || {
            let config = crate::config::Config::default();
            let opts = config.get::<CacheOptions>().unwrap();
            assert_eq!(
                CacheOptions { enable: true, capacity: 64, ttl: Duration::from_secs(3600) },
                *opts
            );
        });
    }
}
