// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Redis-backed cache. The connection is established and verified once at
//! startup; any later failure is logged and surfaced to the pipeline as a
//! plain miss.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::error;

use super::Cache;

pub struct RedisCache {
    // Single mutex serializing the transport.
    connection: Mutex<MultiplexedConnection>,
}

impl RedisCache {
    /// Connects to `host:port` and verifies the server responds to PING.
    /// Construction failure is the caller's signal to fall back to the
    /// in-memory cache.
    pub async fn connect(host: &str, port: u16) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open((host, port))?;
        let mut connection = client.get_multiplexed_tokio_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut connection = self.connection.lock().await;
        let result: Result<Option<String>, _> = connection.get(key).await;
        match result {
            Ok(value) => value,
            Err(e) => {
                error!("Redis GET failed for key {key}: {e}");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let mut connection = self.connection.lock().await;
        let result: Result<(), _> = if ttl > Duration::ZERO {
            connection.set_ex(key, value, ttl.as_secs()).await
        } else {
            connection.set(key, value).await
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Redis SET failed for key {key}: {e}");
                false
            }
        }
    }

    async fn remove(&self, key: &str) -> bool {
        let mut connection = self.connection.lock().await;
        let result: Result<i64, _> = connection.del(key).await;
        match result {
            Ok(removed) => removed > 0,
            Err(e) => {
                error!("Redis DEL failed for key {key}: {e}");
                false
            }
        }
    }

    async fn clear(&self) -> bool {
        let mut connection = self.connection.lock().await;
        let result: Result<(), _> = redis::cmd("FLUSHALL").query_async(&mut *connection).await;
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Redis FLUSHALL failed: {e}");
                false
            }
        }
    }

    async fn exists(&self, key: &str) -> bool {
        let mut connection = self.connection.lock().await;
        let result: Result<bool, _> = connection.exists(key).await;
        match result {
            Ok(found) => found,
            Err(e) => {
                error!("Redis EXISTS failed for key {key}: {e}");
                false
            }
        }
    }
}
