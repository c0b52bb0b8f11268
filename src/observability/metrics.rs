//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define edge metrics (decisions, latency, telemetry queue health)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `edge_requests_total` (counter): requests by decision, method
//! - `edge_request_duration_seconds` (histogram): latency by method
//! - `edge_event_queue_depth` (gauge): events waiting for delivery
//! - `edge_dropped_events_total` (counter): events shed because the queue was full
//! - `edge_ingest_failures_total` (counter): failed deliveries to the ingest sink
//! - `edge_events_discarded_total` (counter): events left in the queue at shutdown
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Exposition runs on its own listener so the main listener stays
//!   fully pipeline-governed
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

use crate::events::Decision;

pub const REQUESTS_TOTAL: &str = "edge_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "edge_request_duration_seconds";
pub const EVENT_QUEUE_DEPTH: &str = "edge_event_queue_depth";
pub const DROPPED_EVENTS_TOTAL: &str = "edge_dropped_events_total";
pub const INGEST_FAILURES_TOTAL: &str = "edge_ingest_failures_total";
pub const EVENTS_DISCARDED_TOTAL: &str = "edge_events_discarded_total";

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the Prometheus recorder and start its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )?
        .install()?;

    ::metrics::describe_counter!(REQUESTS_TOTAL, "Requests processed by the edge, by decision and method.");
    ::metrics::describe_histogram!(REQUEST_DURATION_SECONDS, "Latency of requests handled by the edge.");
    ::metrics::describe_gauge!(EVENT_QUEUE_DEPTH, "Telemetry events waiting to be delivered to ingest.");
    ::metrics::describe_counter!(DROPPED_EVENTS_TOTAL, "Telemetry events dropped because the queue was full.");
    ::metrics::describe_counter!(INGEST_FAILURES_TOTAL, "Failed deliveries to the ingest service.");
    ::metrics::describe_counter!(EVENTS_DISCARDED_TOTAL, "Telemetry events still queued at shutdown.");

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one completed pipeline request.
pub fn record_request(method: &str, decision: Decision, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    ::metrics::counter!(
        REQUESTS_TOTAL,
        "decision" => decision.as_str(),
        "method" => method.to_string()
    )
    .increment(1);
    ::metrics::histogram!(REQUEST_DURATION_SECONDS, "method" => method.to_string()).record(elapsed);
}

pub fn set_queue_depth(depth: usize) {
    ::metrics::gauge!(EVENT_QUEUE_DEPTH).set(depth as f64);
}

pub fn record_dropped_event() {
    ::metrics::counter!(DROPPED_EVENTS_TOTAL).increment(1);
}

pub fn record_ingest_failure() {
    ::metrics::counter!(INGEST_FAILURES_TOTAL).increment(1);
}

pub fn record_discarded_events(count: u64) {
    ::metrics::counter!(EVENTS_DISCARDED_TOTAL).increment(count);
}
