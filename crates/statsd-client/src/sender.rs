// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background sender task that batches StatsD lines into UDP datagrams.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error};

#[derive(Debug)]
pub enum SenderCommand {
    /// Buffer a single StatsD line for the next datagram.
    Emit(String),
    /// Force a flush of everything currently buffered and acknowledge.
    Flush(oneshot::Sender<()>),
    /// Flush and stop the sender task.
    Shutdown,
}

/// Cheap-to-clone handle used by [`crate::StatsdClient`] to talk to the
/// sender task.
#[derive(Clone)]
pub struct SenderHandle {
    tx: mpsc::UnboundedSender<SenderCommand>,
}

impl SenderHandle {
    pub fn emit(&self, line: String) -> Result<(), mpsc::error::SendError<SenderCommand>> {
        self.tx.send(SenderCommand::Emit(line))
    }

    /// Flushes the buffer and waits until the datagram has been handed to the
    /// socket.
    pub async fn flush(&self) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(SenderCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {e}"))?;
        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush acknowledgement: {e}"))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<SenderCommand>> {
        self.tx.send(SenderCommand::Shutdown)
    }
}

/// Owns the UDP socket and the line buffer. Runs until shut down or until
/// every handle is dropped; both paths perform a final flush.
pub struct SenderService {
    socket: UdpSocket,
    rx: mpsc::UnboundedReceiver<SenderCommand>,
    buffer: Vec<String>,
    batch_size: usize,
    send_interval: Duration,
}

impl SenderService {
    pub fn new(
        socket: UdpSocket,
        batch_size: usize,
        send_interval: Duration,
    ) -> (Self, SenderHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            socket,
            rx,
            buffer: Vec::with_capacity(batch_size.max(1)),
            batch_size: batch_size.max(1),
            send_interval,
        };
        (service, SenderHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("StatsD sender service started");
        // tokio panics on a zero-length interval.
        let mut ticker = interval(self.send_interval.max(Duration::from_millis(1)));
        // The first tick fires immediately; discard it so the interval
        // measures from startup rather than flushing an empty buffer.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_buffer().await;
                }
                command = self.rx.recv() => match command {
                    Some(SenderCommand::Emit(line)) => {
                        self.buffer.push(line);
                        if self.buffer.len() >= self.batch_size {
                            self.flush_buffer().await;
                        }
                    }
                    Some(SenderCommand::Flush(ack)) => {
                        self.flush_buffer().await;
                        if ack.send(()).is_err() {
                            error!("Failed to acknowledge StatsD flush - receiver dropped");
                        }
                    }
                    Some(SenderCommand::Shutdown) | None => {
                        self.flush_buffer().await;
                        break;
                    }
                },
            }
        }

        debug!("StatsD sender service stopped");
    }

    async fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let datagram = self.buffer.join("\n");
        self.buffer.clear();
        if let Err(e) = self.socket.send(datagram.as_bytes()).await {
            error!("Failed to send StatsD datagram: {e}");
        }
    }
}
