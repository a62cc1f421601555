// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-upstream circuit breaker.
//!
//! The breaker is a single cooldown timestamp per backend URL: tripped means
//! an entry exists whose deadline is still in the future. There is no
//! half-open state and no failure counter; the short default cooldown sheds
//! concurrent bursts against a failing backend without quarantining it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::error;

use statsd_client::MetricsClient;

use crate::config::metric;

pub struct CircuitBreaker {
    metrics: Arc<dyn MetricsClient>,
    tripped_backends: Mutex<HashMap<String, Instant>>,
}

impl CircuitBreaker {
    pub fn new(metrics: Arc<dyn MetricsClient>) -> Self {
        Self {
            metrics,
            tripped_backends: Mutex::new(HashMap::new()),
        }
    }

    /// True while `backend_url` is inside a cooldown window. An entry whose
    /// window has passed is semantically absent and removed on observation.
    pub async fn is_tripped(&self, backend_url: &str) -> bool {
        let mut tripped = self.tripped_backends.lock().await;
        match tripped.get(backend_url) {
            Some(until) if *until > Instant::now() => {
                error!("Circuit breaker tripped for backend: {backend_url}");
                true
            }
            Some(_) => {
                tripped.remove(backend_url);
                false
            }
            None => false,
        }
    }

    /// Starts (or extends) the cooldown window for `backend_url`.
    pub async fn trip(&self, backend_url: &str, cooldown: Duration) {
        let mut tripped = self.tripped_backends.lock().await;
        tripped.insert(backend_url.to_string(), Instant::now() + cooldown);
        self.metrics.incr(metric::CIRCUIT_BREAKER_LOGGED);
        error!(
            "Tripping circuit breaker for backend: {backend_url} for {}ms",
            cooldown.as_millis()
        );
    }
}
