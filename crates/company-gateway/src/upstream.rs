// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous upstream client.
//!
//! Each call issues `GET /companies/{id}` against the selected backend with
//! an overall per-attempt deadline and completes exactly once. There are no
//! retries at this layer. All in-flight calls share a cancellation token so
//! shutdown can resolve them early instead of waiting out their deadlines.

use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::BackendTarget;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream call timed out: {0}")]
    TimedOut(reqwest::Error),

    #[error("Upstream connection failed: {0}")]
    Connect(reqwest::Error),

    #[error("Upstream transport error: {0}")]
    Transport(reqwest::Error),

    #[error("Upstream call aborted by shutdown")]
    Cancelled,
}

impl UpstreamError {
    /// Connection-level failures are the ones that trip the circuit breaker;
    /// a shutdown-driven abort is not the backend's fault.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, UpstreamError::TimedOut(_) | UpstreamError::Connect(_))
    }
}

fn classify(error: reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::TimedOut(error)
    } else if error.is_connect() {
        UpstreamError::Connect(error)
    } else {
        UpstreamError::Transport(error)
    }
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub struct UpstreamClient {
    client: reqwest::Client,
    cancellation: CancellationToken,
}

impl UpstreamClient {
    /// Builds the shared HTTP client. Connections are pooled per
    /// `(host, port)`; gzip and deflate response bodies are transparently
    /// decompressed.
    pub fn new(
        connect_timeout: Duration,
        cancellation: CancellationToken,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .gzip(true)
            .deflate(true)
            .use_rustls_tls()
            .build()?;
        Ok(Self {
            client,
            cancellation,
        })
    }

    /// Fetches the company payload for `company_id` from `target`, bounded
    /// by `deadline` end to end.
    pub async fn call(
        &self,
        target: &BackendTarget,
        company_id: &str,
        deadline: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = format!("{}/companies/{company_id}", target.endpoint());
        debug!("Calling upstream {url}");

        let request = self.client.get(&url).timeout(deadline).send();
        let response = tokio::select! {
            _ = self.cancellation.cancelled() => return Err(UpstreamError::Cancelled),
            response = request => response.map_err(classify)?,
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = tokio::select! {
            _ = self.cancellation.cancelled() => return Err(UpstreamError::Cancelled),
            body = response.bytes() => body.map_err(classify)?,
        };

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
