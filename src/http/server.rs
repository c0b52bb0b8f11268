//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the health bypass and the pipeline fallback
//! - Wire up middleware (tracing, request ID, body limit)
//! - Bind server to listener
//! - Graceful drain with a bounded grace period on shutdown

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Response, StatusCode},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::EdgeConfig;
use crate::events::EventDispatcher;
use crate::http::forward::Forwarder;
use crate::http::handler::pipeline_handler;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::response::plain_text;
use crate::lifecycle::Shutdown;
use crate::observability::tracing::http_trace_layer;
use crate::security::rate_limit::{AdmissionPolicy, Limiter};

/// Liveness path answered without touching the pipeline.
pub const HEALTH_PATH: &str = "/healthz";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn Limiter>,
    pub forwarder: Arc<dyn Forwarder>,
    pub dispatcher: EventDispatcher,
    pub policy: AdmissionPolicy,
    pub edge_node: Arc<str>,
    /// Deadline for the whole pipeline of one request.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        config: &EdgeConfig,
        limiter: Arc<dyn Limiter>,
        forwarder: Arc<dyn Forwarder>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            limiter,
            forwarder,
            dispatcher,
            policy: AdmissionPolicy::from(&config.rate_limit),
            edge_node: Arc::from(config.edge.node_name.as_str()),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        }
    }
}

/// HTTP server for the edge node.
pub struct EdgeServer {
    router: Router,
    config: EdgeConfig,
}

impl EdgeServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: EdgeConfig, state: AppState) -> Self {
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The request timeout is enforced inside the pipeline handler so the
    /// recorded event carries the status the client actually received.
    pub fn build_router(config: &EdgeConfig, state: AppState) -> Router {
        Router::new()
            .route(HEALTH_PATH, get(health_handler).fallback(pipeline_handler))
            .fallback(pipeline_handler)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(propagate_request_id_layer())
            .layer(http_trace_layer())
            .layer(set_request_id_layer())
    }

    /// Run the server, accepting connections until `shutdown` fires.
    ///
    /// In-flight requests get `timeouts.shutdown_grace_secs` to finish after
    /// the signal; whatever is still running then is dropped.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let drain_signal = shutdown.clone();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { drain_signal.wait().await })
            .into_future();

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        let deadline = async move {
            shutdown.wait().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            result = serve => result?,
            _ = deadline => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "Shutdown grace period elapsed, abandoning in-flight requests"
                );
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }
}

async fn health_handler() -> Response<Body> {
    plain_text(StatusCode::OK, "ok")
}
