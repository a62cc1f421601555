// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers: a scriptable mock upstream and a fully wired gateway.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use statsd_client::{MetricsClient, NoopMetricsClient};

use company_gateway::backend::BackendTarget;
use company_gateway::cache::{Cache, InMemoryCache};
use company_gateway::config::AppConfig;
use company_gateway::gateway::CompanyGateway;
use company_gateway::server::GatewayServer;
use company_gateway::upstream::UpstreamClient;

/// One scripted upstream answer.
#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl MockResponse {
    pub fn company_v1(body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some("application/x-company-v1".to_string()),
            body: body.to_string(),
        }
    }

    pub fn company_v2(body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some("application/x-company-v2".to_string()),
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
        }
    }
}

/// Mock company upstream on a random port. Records every request path.
#[derive(Clone)]
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str) -> MockResponse + Clone + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_clone = requests.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let io = TokioIo::new(stream);
                let requests = requests_clone.clone();
                let responder = responder.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let requests = requests.clone();
                        let responder = responder.clone();
                        async move {
                            let path = req.uri().path().to_string();
                            requests.lock().unwrap().push(path.clone());

                            let mock = responder(&path);
                            let mut builder = Response::builder().status(mock.status);
                            if let Some(content_type) = &mock.content_type {
                                builder = builder.header("Content-Type", content_type.clone());
                            }
                            builder.body(Full::new(Bytes::from(mock.body)))
                        }
                    });

                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockUpstream { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn target(&self) -> BackendTarget {
        BackendTarget::parse(&self.url()).expect("mock upstream URL must parse")
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Records every StatsD line the gateway emits.
pub struct CaptureMetrics {
    pub lines: Mutex<Vec<String>>,
}

impl CaptureMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(Vec::new()),
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl MetricsClient for CaptureMetrics {
    fn emit(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

/// Test configuration with generous network budgets so the SLA and upstream
/// deadlines only fire when a test asks for it.
pub fn test_config() -> AppConfig {
    AppConfig {
        server_sla: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(1),
        breaker_cooldown: Duration::from_secs(5),
        use_redis: false,
        ..AppConfig::default()
    }
}

/// A gateway wired with an in-memory cache, listening on a random port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub gateway: Arc<CompanyGateway>,
    pub cache: Arc<dyn Cache>,
    pub shutdown: CancellationToken,
}

impl TestGateway {
    pub async fn start(config: AppConfig) -> Self {
        let metrics: Arc<dyn MetricsClient> = Arc::new(NoopMetricsClient);
        Self::start_with_metrics(config, metrics).await
    }

    pub async fn start_with_metrics(config: AppConfig, metrics: Arc<dyn MetricsClient>) -> Self {
        let config = Arc::new(config);
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new(Duration::from_secs(3600), 1000));
        let upstream = UpstreamClient::new(config.connect_timeout, CancellationToken::new())
            .expect("failed to build upstream client");
        let gateway = Arc::new(CompanyGateway::new(
            config.clone(),
            cache.clone(),
            metrics,
            upstream,
        ));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind gateway listener");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let shutdown = CancellationToken::new();
        let server = GatewayServer::new(gateway.clone(), config, shutdown.clone());
        tokio::spawn(async move {
            let _ = server.run(listener).await;
        });

        TestGateway {
            addr,
            gateway,
            cache,
            shutdown,
        }
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }
}
