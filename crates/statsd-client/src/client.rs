// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metrics client trait and its StatsD / no-op implementations.

use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, error};

use crate::sender::{SenderHandle, SenderService};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("StatsD endpoint must be in the format <host>:<port>, got {0:?}")]
    InvalidEndpoint(String),

    #[error("Invalid port in StatsD endpoint {0:?}")]
    InvalidPort(String),

    #[error("Failed to initialize StatsD UDP socket: {0}")]
    Socket(#[from] std::io::Error),
}

/// Fire-and-forget metrics sink.
///
/// The provided methods format StatsD text lines and forward them to
/// [`MetricsClient::emit`]; implementations only decide where a finished line
/// goes. Every operation is best-effort and must never fail the caller.
pub trait MetricsClient: Send + Sync {
    fn emit(&self, line: String);

    fn count(&self, key: &str, value: i64) {
        self.emit(format!("{key}:{value}|c"));
    }

    fn incr(&self, key: &str) {
        self.count(key, 1);
    }

    fn decr(&self, key: &str) {
        self.count(key, -1);
    }

    fn gauge(&self, key: &str, value: f64) {
        self.emit(format!("{key}:{value}|g"));
    }

    fn timing(&self, key: &str, value: Duration) {
        self.emit(format!("{key}:{}|ms", value.as_millis()));
    }

    fn set(&self, key: &str, value: &str) {
        self.emit(format!("{key}:{value}|s"));
    }
}

/// Real StatsD client backed by a batched UDP sender task.
pub struct StatsdClient {
    handle: SenderHandle,
}

impl StatsdClient {
    /// Parses a `host:port` endpoint, connects a UDP socket to it, and spawns
    /// the background sender service.
    ///
    /// `localhost` is rewritten to `127.0.0.1` so resolution cannot land on
    /// an IPv6 loopback the StatsD server is not listening on.
    pub async fn new(
        endpoint: &str,
        batch_size: usize,
        send_interval: Duration,
    ) -> Result<Self, MetricsError> {
        let (host, port) = endpoint
            .split_once(':')
            .ok_or_else(|| MetricsError::InvalidEndpoint(endpoint.to_string()))?;
        let host = if host == "localhost" { "127.0.0.1" } else { host };
        let port: u16 = port
            .parse()
            .map_err(|_| MetricsError::InvalidPort(endpoint.to_string()))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;

        let (service, handle) = SenderService::new(socket, batch_size, send_interval);
        tokio::spawn(service.run());
        debug!("StatsD sender initialized for {host}:{port}");

        Ok(Self { handle })
    }

    /// Flushes anything still buffered and stops the sender task.
    pub async fn shutdown(&self) {
        if let Err(e) = self.handle.flush().await {
            error!("StatsD final flush failed: {e}");
        }
        let _ = self.handle.shutdown();
    }
}

impl MetricsClient for StatsdClient {
    fn emit(&self, line: String) {
        if self.handle.emit(line).is_err() {
            error!("StatsD sender task is gone, dropping metric");
        }
    }
}

/// Sink used when no StatsD server is configured. Discards everything.
pub struct NoopMetricsClient;

impl MetricsClient for NoopMetricsClient {
    fn emit(&self, _line: String) {}
}
