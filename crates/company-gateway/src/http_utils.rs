// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Response construction helpers shared by the request pipeline and the
//! per-connection sessions.

use bytes::Bytes;
use http::StatusCode;
use tracing::{debug, error};

pub const ERROR_MISSING_PARAMETERS: &str = r#"{"error":"Missing required parameters"}"#;
pub const ERROR_UNCONFIGURED_COUNTRY: &str = r#"{"error":"Unconfigured country_iso"}"#;
pub const ERROR_NOT_FOUND: &str = r#"{"error":"Not Found"}"#;
pub const ERROR_BAD_GATEWAY: &str = r#"{"error":"Bad Gateway"}"#;
pub const ERROR_GATEWAY_TIMEOUT: &str = r#"{"error":"Gateway Timeout"}"#;
pub const ERROR_INTERNAL: &str = r#"{"error":"Internal Error"}"#;

/// A fully materialized HTTP/1.1 response, ready for the session's write
/// queue.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.into(),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
        }
    }

    /// Serializes status line, headers, and body into wire bytes.
    pub fn to_wire(&self, keep_alive: bool) -> Vec<u8> {
        let reason = self.status.canonical_reason().unwrap_or("Unknown");
        let connection = if keep_alive { "keep-alive" } else { "close" };
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
            self.status.as_u16(),
            reason,
            self.content_type,
            self.body.len(),
            connection,
        );
        let mut wire = Vec::with_capacity(head.len() + self.body.len());
        wire.extend_from_slice(head.as_bytes());
        wire.extend_from_slice(&self.body);
        wire
    }
}

/// Logs the given message (debug for success statuses, error otherwise) and
/// builds the JSON response carrying `body`.
pub fn log_and_json_response(message: &str, status: StatusCode, body: &'static str) -> HttpResponse {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    HttpResponse::json(status, body)
}
