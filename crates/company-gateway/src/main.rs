// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use statsd_client::{MetricsClient, NoopMetricsClient, StatsdClient};

use company_gateway::cache::{Cache, InMemoryCache, RedisCache};
use company_gateway::config::{self, AppConfig, LogLevel};
use company_gateway::gateway::CompanyGateway;
use company_gateway::server::GatewayServer;
use company_gateway::upstream::UpstreamClient;

fn init_tracing(log_level: LogLevel) {
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level.as_env_filter());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

/// Selects the real StatsD sink when `STATSD_SERVER` names a reachable
/// endpoint, otherwise a no-op sink. Also returns the concrete client so the
/// shutdown path can run a final flush.
async fn initialize_metrics(config: &AppConfig) -> (Arc<dyn MetricsClient>, Option<Arc<StatsdClient>>) {
    let endpoint = match env::var("STATSD_SERVER") {
        Ok(endpoint) if !endpoint.is_empty() => endpoint,
        _ => {
            info!("STATSD_SERVER not set; metrics disabled");
            let noop: Arc<dyn MetricsClient> = Arc::new(NoopMetricsClient);
            return (noop, None);
        }
    };

    match StatsdClient::new(
        &endpoint,
        config.metrics_batch_size,
        config.metrics_send_interval,
    )
    .await
    {
        Ok(client) => {
            info!("StatsD client initialized for {endpoint}");
            let client = Arc::new(client);
            let metrics: Arc<dyn MetricsClient> = client.clone();
            (metrics, Some(client))
        }
        Err(e) => {
            error!("Failed to create StatsD client: {e}. Metrics disabled");
            let noop: Arc<dyn MetricsClient> = Arc::new(NoopMetricsClient);
            (noop, None)
        }
    }
}

/// Redis when configured and reachable; bounded in-memory LRU otherwise.
async fn initialize_cache(config: &AppConfig) -> Arc<dyn Cache> {
    if config.use_redis {
        match RedisCache::connect(&config.redis_host, config.redis_port).await {
            Ok(cache) => {
                info!(
                    "Redis cache connected at {}:{}",
                    config.redis_host, config.redis_port
                );
                return Arc::new(cache);
            }
            Err(e) => error!("Redis cache unavailable ({e}); falling back to in-memory cache"),
        }
    }
    info!("Creating in-memory cache");
    Arc::new(InMemoryCache::new(
        config.in_memory_cache_ttl,
        config.in_memory_cache_max_size,
    ))
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = signal(SignalKind::interrupt());
    let terminate = signal(SignalKind::terminate());
    match (interrupt, terminate) {
        (Ok(mut interrupt), Ok(mut terminate)) => {
            tokio::select! {
                _ = interrupt.recv() => info!("SIGINT received"),
                _ = terminate.recv() => info!("SIGTERM received"),
            }
        }
        _ => {
            error!("Failed to install signal handlers; falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
pub async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let startup_args = match config::parse_arguments(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Failed to parse command-line arguments: {e}");
            std::process::exit(1);
        }
    };

    let config = Arc::new(config::load_configuration(&startup_args));
    init_tracing(config.log_level);
    info!("Configuration loaded");
    info!("{config}");

    let (metrics, statsd) = initialize_metrics(&config).await;
    let cache = initialize_cache(&config).await;

    let upstream_cancellation = CancellationToken::new();
    let upstream = match UpstreamClient::new(config.connect_timeout, upstream_cancellation.clone())
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build upstream HTTP client: {e}");
            return;
        }
    };

    let gateway = Arc::new(CompanyGateway::new(
        config.clone(),
        cache,
        metrics,
        upstream,
    ));

    let listener = match TcpListener::bind(("0.0.0.0", config.frontend_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind frontend port {}: {e}", config.frontend_port);
            return;
        }
    };
    info!(
        "Frontend server listening on 0.0.0.0:{} with {} configured country backends",
        config.frontend_port,
        config.country_backend_map.len()
    );

    let shutdown = CancellationToken::new();
    let server = GatewayServer::new(gateway, config.clone(), shutdown.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(listener).await {
            error!("Server error: {e}");
        }
    });

    wait_for_shutdown_signal().await;
    info!("Shutting down");

    // Stop accepting, signal sessions to close after their current write,
    // and resolve in-flight upstream calls early.
    shutdown.cancel();
    upstream_cancellation.cancel();

    if let Err(e) = server_handle.await {
        error!("Server task failed during shutdown: {e}");
    }

    if let Some(statsd) = statsd {
        statsd.shutdown().await;
    }

    info!("Shutdown complete");
}
