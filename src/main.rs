//! edge-gate: admission-control edge proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                    EDGE NODE                     │
//!   Client Request     │  ┌────────┐   ┌──────────┐   ┌──────────────┐   │
//!   ───────────────────┼─▶│  http  │──▶│ identity │──▶│ rate limiter │◀──┼──▶ Redis
//!                      │  │ server │   └──────────┘   └──────┬───────┘   │
//!                      │  └────────┘                         │           │
//!                      │      ▲          429 / 500 ◀─────────┤           │
//!   Client Response    │      │                              ▼           │
//!   ◀──────────────────┼──────┴────────────────────── origin forwarder ◀──┼──▶ Origin
//!                      │                                                  │
//!                      │  every request ─▶ event queue ─▶ delivery worker─┼──▶ Ingest
//!                      └──────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use edge_gate::config::load_config;
use edge_gate::events::{EventDispatcher, HttpPublisher};
use edge_gate::http::{AppState, EdgeServer, OriginForwarder};
use edge_gate::lifecycle::{spawn_signal_handler, Shutdown};
use edge_gate::observability::{init_logging, init_metrics};
use edge_gate::security::RedisLimiter;

/// Admission-control edge proxy.
#[derive(Debug, Parser)]
#[command(name = "edge-gate", version, about)]
struct Cli {
    /// Path to a TOML config file. Defaults and environment variables apply
    /// when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-gate starting");
    tracing::info!(
        edge_node = %config.edge.node_name,
        bind_address = %config.listener.bind_address,
        origin = %config.origin.url,
        ingest = %config.ingest.url,
        window_secs = config.rate_limit.window_secs,
        ip_max_requests = config.rate_limit.ip_max_requests,
        api_key_max_requests = config.rate_limit.api_key_max_requests,
        queue_capacity = config.events.queue_capacity,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    // The store is a hard dependency: refuse to serve without it.
    let store_url = config.store.connection_url();
    let limiter = RedisLimiter::connect(&store_url, config.store.timeout()).await?;
    limiter.ping().await?;
    tracing::info!(address = %config.store.address, "Connected to rate limit store");

    let publisher = Arc::new(HttpPublisher::new(config.ingest.url.clone(), config.ingest.timeout())?);
    let (dispatcher, worker) =
        EventDispatcher::new(config.events.queue_capacity, publisher, config.ingest.timeout());
    let forwarder = Arc::new(OriginForwarder::new(
        &config.origin.url,
        Duration::from_secs(config.origin.timeout_secs),
    )?);

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    let worker_handle = tokio::spawn(worker.run(shutdown.token()));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let state = AppState::new(&config, Arc::new(limiter), forwarder, dispatcher);
    let server = EdgeServer::new(config, state);
    let result = server.run(listener, shutdown.clone()).await;

    // Stop the worker even if the server exited on its own.
    shutdown.trigger();
    worker_handle.await?;

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}
