// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accept loop and session lifecycle.
//!
//! Each accepted connection is served by its own [`Session`] task tracked in
//! a `JoinSet`. Shutdown cancels the accept loop, signals every session
//! through the shared token, and drains the set with a bounded grace period
//! before aborting whatever is left.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::gateway::CompanyGateway;
use crate::session::Session;

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub struct GatewayServer {
    gateway: Arc<CompanyGateway>,
    config: Arc<AppConfig>,
    shutdown: CancellationToken,
}

impl GatewayServer {
    pub fn new(
        gateway: Arc<CompanyGateway>,
        config: Arc<AppConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            config,
            shutdown,
        }
    }

    pub async fn run(&self, listener: TcpListener) -> Result<(), io::Error> {
        let mut sessions = JoinSet::new();

        loop {
            let conn = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server accept error: {e}");
                        return Err(e);
                    }
                    Ok((conn, peer)) => {
                        debug!("Accepted connection from {peer}");
                        conn
                    }
                },
                finished = async {
                    match sessions.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill the server on a panicking session.
                        error!("Session handler panicked: {e:?}");
                        continue;
                    }
                    Ok(()) | Err(_) => continue,
                },
                _ = self.shutdown.cancelled() => break,
            };

            let session = Session::new(
                conn,
                self.gateway.clone(),
                &self.config,
                self.shutdown.child_token(),
            );
            sessions.spawn(session.run());
        }

        info!(
            "Stopped accepting connections; draining {} active sessions",
            sessions.len()
        );
        let drained = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Session drain exceeded grace period; aborting remaining sessions");
            sessions.shutdown().await;
        }

        Ok(())
    }
}
