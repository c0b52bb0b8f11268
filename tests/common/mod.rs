//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use edge_gate::config::EdgeConfig;
use edge_gate::events::{DeliveryReport, DeliveryWorker, DispatcherStats, EventDispatcher, Publisher};
use edge_gate::http::{AppState, EdgeServer, Forwarder, UpstreamError};
use edge_gate::lifecycle::Shutdown;
use edge_gate::security::Limiter;

pub const CLIENT_ADDR: &str = "203.0.113.7:51000";

pub fn client_addr() -> SocketAddr {
    CLIENT_ADDR.parse().unwrap()
}

/// Config suitable for tests: small thresholds, nothing exported.
pub fn test_config() -> EdgeConfig {
    let mut config = EdgeConfig::default();
    config.edge.node_name = "edge-test".into();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.rate_limit.window_secs = 60;
    config.rate_limit.ip_max_requests = 2;
    config.rate_limit.api_key_max_requests = 1000;
    config.events.queue_capacity = 64;
    config.timeouts.shutdown_grace_secs = 1;
    config.observability.metrics_enabled = false;
    config
}

/// Start a programmable mock origin on an ephemeral port.
///
/// Reads the request head, then answers with whatever `f` returns.
pub async fn start_programmable_origin<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                        }

                        let (status, body) = f().await;
                        let reason = StatusCode::from_u16(status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");
                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            reason,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a mock origin that always returns the same status and body.
pub async fn start_mock_origin(status: u16, body: &'static str) -> SocketAddr {
    start_programmable_origin(move || async move { (status, body.to_string()) }).await
}

/// Mock ingest service recording every batch it receives.
#[derive(Clone)]
pub struct MockIngest {
    pub addr: SocketAddr,
    batches: Arc<Mutex<Vec<serde_json::Value>>>,
    status: Arc<AtomicU16>,
}

impl MockIngest {
    pub async fn start(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ingest = Self {
            addr,
            batches: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(AtomicU16::new(status)),
        };

        let app = Router::new()
            .route("/v1/events", post(receive))
            .with_state(ingest.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        ingest
    }

    pub fn url(&self) -> String {
        format!("http://{}/v1/events", self.addr)
    }

    pub fn batches(&self) -> Vec<serde_json::Value> {
        self.batches.lock().unwrap().clone()
    }

    /// Wait until at least `count` batches have arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<serde_json::Value> {
        for _ in 0..100 {
            let batches = self.batches();
            if batches.len() >= count {
                return batches;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("ingest received {} batches, expected {}", self.batches().len(), count);
    }
}

async fn receive(State(ingest): State<MockIngest>, Json(batch): Json<serde_json::Value>) -> StatusCode {
    ingest.batches.lock().unwrap().push(batch);
    StatusCode::from_u16(ingest.status.load(Ordering::SeqCst)).unwrap()
}

/// Forwarder double answering every request itself.
pub struct StaticForwarder {
    status: StatusCode,
    calls: Mutex<Vec<String>>,
}

impl StaticForwarder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Paths forwarded so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for StaticForwarder {
    async fn forward(&self, request: Request<Body>, _peer: SocketAddr) -> Result<Response<Body>, UpstreamError> {
        self.calls.lock().unwrap().push(request.uri().path().to_string());
        let mut response = Response::new(Body::from("origin"));
        *response.status_mut() = self.status;
        Ok(response)
    }
}

/// Forwarder double whose origin is always down.
pub struct DownForwarder;

#[async_trait]
impl Forwarder for DownForwarder {
    async fn forward(&self, _request: Request<Body>, _peer: SocketAddr) -> Result<Response<Body>, UpstreamError> {
        Err(UpstreamError::Timeout(Duration::from_millis(1)))
    }
}

/// Forwarder double that takes `delay` before answering 200.
pub struct SlowForwarder {
    pub delay: Duration,
}

#[async_trait]
impl Forwarder for SlowForwarder {
    async fn forward(&self, _request: Request<Body>, _peer: SocketAddr) -> Result<Response<Body>, UpstreamError> {
        tokio::time::sleep(self.delay).await;
        Ok(Response::new(Body::from("late")))
    }
}

/// A running edge node bound to an ephemeral port.
pub struct EdgeHandle {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub stats: Arc<DispatcherStats>,
    server: JoinHandle<std::io::Result<()>>,
    worker: Option<JoinHandle<DeliveryReport>>,
}

impl EdgeHandle {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server and worker to stop.
    pub async fn stop(self) -> Option<DeliveryReport> {
        self.shutdown.trigger();
        self.server.await.unwrap().unwrap();
        match self.worker {
            Some(worker) => Some(worker.await.unwrap()),
            None => None,
        }
    }
}

/// Start an edge node with a running delivery worker.
pub async fn start_edge(
    config: EdgeConfig,
    limiter: Arc<dyn Limiter>,
    forwarder: Arc<dyn Forwarder>,
    publisher: Arc<dyn Publisher>,
) -> EdgeHandle {
    let (handle, worker) = start_edge_inner(config, limiter, forwarder, publisher).await;
    let token = handle.shutdown.token();
    EdgeHandle {
        worker: Some(tokio::spawn(worker.run(token))),
        ..handle
    }
}

/// Start an edge node whose delivery worker never runs, so queued events
/// stay queued.
pub async fn start_edge_without_worker(
    config: EdgeConfig,
    limiter: Arc<dyn Limiter>,
    forwarder: Arc<dyn Forwarder>,
    publisher: Arc<dyn Publisher>,
) -> (EdgeHandle, DeliveryWorker) {
    start_edge_inner(config, limiter, forwarder, publisher).await
}

async fn start_edge_inner(
    config: EdgeConfig,
    limiter: Arc<dyn Limiter>,
    forwarder: Arc<dyn Forwarder>,
    publisher: Arc<dyn Publisher>,
) -> (EdgeHandle, DeliveryWorker) {
    let (dispatcher, worker) =
        EventDispatcher::new(config.events.queue_capacity, publisher, config.ingest.timeout());
    let stats = dispatcher.stats().clone();

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let state = AppState::new(&config, limiter, forwarder, dispatcher);
    let server = EdgeServer::new(config, state);
    let server = tokio::spawn(server.run(listener, shutdown.clone()));

    let handle = EdgeHandle {
        addr,
        shutdown,
        stats,
        server,
        worker: None,
    };
    (handle, worker)
}

/// Wait until `condition` holds, polling briefly.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}
