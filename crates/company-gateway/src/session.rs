// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-connection HTTP/1.1 session.
//!
//! A session reads requests off the socket (30 s idle deadline), dispatches
//! them to the pipeline, and writes the resulting responses back in request
//! order through a bounded FIFO queue. When the queue is full the oldest
//! pending response is discarded to make room, never the newest; a dropped
//! request emits nothing and the connection keeps serving. Each write is
//! guarded by a safety timer that force-closes the socket if the write never
//! completes.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::AppConfig;
use crate::gateway::CompanyGateway;
use crate::http_utils::HttpResponse;

const READ_DEADLINE: Duration = Duration::from_secs(30);
const WRITE_SAFETY_DEADLINE: Duration = Duration::from_secs(5);
const READ_CHUNK_SIZE: usize = 4096;
const MAX_REQUEST_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 32;

/// Bounded FIFO of responses awaiting their turn on the socket.
///
/// Overflow discards the head: under back-pressure the furthest-behind
/// response is the one sacrificed to keep the connection live.
pub struct ResponseQueue {
    responses: VecDeque<HttpResponse>,
    max_size: usize,
}

impl ResponseQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            responses: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Queues `response`, returning the discarded oldest entry if the queue
    /// was full.
    pub fn push(&mut self, response: HttpResponse) -> Option<HttpResponse> {
        let discarded = if self.responses.len() >= self.max_size {
            self.responses.pop_front()
        } else {
            None
        };
        self.responses.push_back(response);
        discarded
    }

    pub fn pop(&mut self) -> Option<HttpResponse> {
        self.responses.pop_front()
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

/// One parsed inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub keep_alive: bool,
}

pub struct Session {
    stream: TcpStream,
    gateway: Arc<CompanyGateway>,
    shutdown: CancellationToken,
    queue: ResponseQueue,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        gateway: Arc<CompanyGateway>,
        config: &AppConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stream,
            gateway,
            shutdown,
            queue: ResponseQueue::new(config.max_response_queue_size),
        }
    }

    pub async fn run(mut self) {
        let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE);

        loop {
            let request = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                request = read_request(&mut self.stream, &mut buffer) => match request {
                    Ok(Some(request)) => request,
                    Ok(None) => {
                        debug!("Session read end-of-stream, closing");
                        break;
                    }
                    Err(e) => {
                        if e.kind() == io::ErrorKind::TimedOut {
                            debug!("Session idle past read deadline, closing");
                        } else {
                            error!("Session read error: {e}");
                        }
                        break;
                    }
                },
            };

            let received_at = Instant::now();
            let keep_alive = request.keep_alive;
            let response = self.dispatch(&request, received_at).await;

            match response {
                None => {
                    // Dropped request: nothing is emitted and nothing is
                    // reordered; keep-alive continues reading.
                    warn!(
                        "Request for target {:?} dropped without a response",
                        request.path
                    );
                    if keep_alive {
                        continue;
                    }
                    break;
                }
                Some(response) => {
                    if let Some(discarded) = self.queue.push(response) {
                        warn!(
                            "Response queue full (max {}); discarding oldest response (status {})",
                            self.queue.max_size,
                            discarded.status.as_u16()
                        );
                    }
                }
            }

            if !self.write_queued(keep_alive).await {
                return;
            }

            if !keep_alive {
                break;
            }
        }

        let _ = self.stream.shutdown().await;
    }

    async fn dispatch(&self, request: &ParsedRequest, received_at: Instant) -> Option<HttpResponse> {
        if request.method != "GET" {
            return Some(HttpResponse::text(StatusCode::NOT_FOUND, "Not Found"));
        }
        match request.path.as_str() {
            "/company" => {
                self.gateway
                    .handle_company(request.query.as_deref(), received_at)
                    .await
            }
            "/status" => Some(self.gateway.handle_status()),
            other => {
                error!("Received unhandled GET request for {other}");
                Some(HttpResponse::text(StatusCode::NOT_FOUND, "Not Found"))
            }
        }
    }

    /// Writes queued responses head first, in insertion order, one write in
    /// flight at a time. Returns false when the session must terminate.
    async fn write_queued(&mut self, keep_alive: bool) -> bool {
        while let Some(response) = self.queue.pop() {
            let wire = response.to_wire(keep_alive);
            match tokio::time::timeout(WRITE_SAFETY_DEADLINE, self.stream.write_all(&wire)).await {
                Ok(Ok(())) => {
                    debug!(
                        "Wrote response (status {}), {} left in queue",
                        response.status.as_u16(),
                        self.queue.len()
                    );
                }
                Ok(Err(e)) => {
                    error!("Session write error: {e}");
                    return false;
                }
                Err(_) => {
                    // The write never completed inside the safety window;
                    // force-close rather than leave a wedged session behind.
                    error!(
                        "Response write did not complete within {WRITE_SAFETY_DEADLINE:?}; \
                         force-closing session socket"
                    );
                    return false;
                }
            }
        }
        true
    }
}

/// Reads one request from the stream, tolerating pipelined bytes already in
/// `buffer`. Returns `Ok(None)` on a clean end-of-stream between requests.
pub async fn read_request(
    stream: &mut TcpStream,
    buffer: &mut Vec<u8>,
) -> io::Result<Option<ParsedRequest>> {
    let deadline = tokio::time::Instant::now() + READ_DEADLINE;
    loop {
        if let Some((request, consumed)) = try_parse_request(buffer)? {
            buffer.drain(..consumed);
            return Ok(Some(request));
        }
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request headers exceed size limit",
            ));
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let read = tokio::time::timeout_at(deadline, stream.read(&mut chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request read deadline"))??;
        if read == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-request",
            ));
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

/// Attempts to parse a complete request head out of `buffer`. Returns the
/// parsed request plus the number of bytes consumed, or `None` when more
/// bytes are needed.
fn try_parse_request(buffer: &[u8]) -> io::Result<Option<(ParsedRequest, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(buffer) {
        Ok(httparse::Status::Complete(consumed)) => {
            let method = request.method.unwrap_or("").to_string();
            let target = request.path.unwrap_or("");
            let (path, query) = match target.split_once('?') {
                Some((path, query)) => (path.to_string(), Some(query.to_string())),
                None => (target.to_string(), None),
            };

            // HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close; an
            // explicit Connection header overrides either way.
            let mut keep_alive = request.version.unwrap_or(1) == 1;
            for header in request.headers.iter() {
                if header.name.eq_ignore_ascii_case("connection") {
                    let value = std::str::from_utf8(header.value).unwrap_or("");
                    if value.eq_ignore_ascii_case("close") {
                        keep_alive = false;
                    } else if value.eq_ignore_ascii_case("keep-alive") {
                        keep_alive = true;
                    }
                }
            }

            Ok(Some((
                ParsedRequest {
                    method,
                    path,
                    query,
                    keep_alive,
                },
                consumed,
            )))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
    }
}
