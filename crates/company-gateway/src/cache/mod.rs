// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Response cache behind a single contract, with a Redis-backed primary and
//! a bounded in-memory LRU fallback.
//!
//! Keys are `"<id>:<COUNTRY>"`. Both implementations are best-effort: a
//! failed operation is logged and reported as a miss (reads) or `false`
//! (writes), never as an error to the request pipeline.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::InMemoryCache;
pub use redis::RedisCache;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the cached value, or `None` on miss, expiry, or backend error.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`. A zero `ttl` means the implementation's
    /// default expiry. Returns whether the value was stored.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool;

    /// Removes `key`; returns whether an entry existed.
    async fn remove(&self, key: &str) -> bool;

    /// Drops every entry.
    async fn clear(&self) -> bool;

    /// Presence test without affecting recency.
    async fn exists(&self, key: &str) -> bool;
}
