// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded in-memory LRU cache with per-entry TTLs.
//!
//! Strict correctness fallback for when Redis is disabled or unreachable:
//! capacity eviction removes the least recently used entry, and expired
//! entries are swept out on every read so an entry is never observable past
//! its expiry.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use super::Cache;

#[derive(Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

pub struct InMemoryCache {
    default_ttl: Duration,
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            default_ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Evicts every expired entry. Runs under the caller's lock.
    fn sweep_expired(entries: &mut LruCache<String, CacheEntry>) {
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        Self::sweep_expired(&mut entries);
        // The surviving entry is promoted to most recently used.
        entries.get(key).map(|entry| entry.value.clone())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let effective_ttl = if ttl > Duration::ZERO {
            ttl
        } else {
            self.default_ttl
        };
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: Instant::now() + effective_ttl,
        };
        let mut entries = self.entries.lock().await;
        entries.push(key.to_string(), entry);
        true
    }

    async fn remove(&self, key: &str) -> bool {
        self.entries.lock().await.pop(key).is_some()
    }

    async fn clear(&self) -> bool {
        self.entries.lock().await.clear();
        true
    }

    async fn exists(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        Self::sweep_expired(&mut entries);
        entries.peek(key).is_some()
    }
}
