//! Per-request admission pipeline.
//!
//! ```text
//! start → identify → admit-check → {reject | forward} → record
//! ```
//!
//! Every request that reaches [`pipeline_handler`] produces exactly one
//! telemetry event and one latency/decision observation. Both are emitted
//! from [`PipelineRecord`]'s `Drop`, so they also happen when the request
//! future is dropped mid-flight (client disconnect, shutdown deadline).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, Response};
use chrono::Utc;

use crate::events::{Decision, Event, EventDispatcher, BLOCKED_SCORE};
use crate::http::request::request_id;
use crate::http::response::{self, StatusRecorder, CLIENT_CLOSED_REQUEST};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::identity::{fingerprint, ClientIdentity};

pub const REASON_RATE_LIMIT: &str = "rate_limit";
pub const REASON_LIMITER_UNAVAILABLE: &str = "limiter_unavailable";
pub const REASON_UPSTREAM_UNAVAILABLE: &str = "upstream_unavailable";
pub const REASON_REQUEST_TIMEOUT: &str = "request_timeout";
pub const REASON_CANCELLED: &str = "cancelled";

/// How far a request got through admission and forwarding.
enum Outcome {
    Allowed(Response<Body>),
    Blocked,
    Failed(Response<Body>, &'static str),
}

/// Main pipeline handler for every non-bypassed request.
///
/// The whole pipeline runs under `timeouts.request_secs`; on expiry the
/// client gets 408 and the event records the same status.
pub async fn pipeline_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let identity = ClientIdentity::from_request(request.headers(), peer);
    let record = PipelineRecord::begin(&state, &request, &identity);
    let id = request_id(request.headers()).to_string();

    let outcome = tokio::time::timeout(
        state.request_timeout,
        admit_and_forward(&state, &identity, peer, request, &id),
    )
    .await;

    match outcome {
        Ok(Outcome::Allowed(response)) => record.allowed(response),
        Ok(Outcome::Blocked) => record.blocked(response::rate_limited()),
        Ok(Outcome::Failed(response, reason)) => record.error(response, reason),
        Err(_) => {
            tracing::warn!(
                request_id = %id,
                timeout_secs = state.request_timeout.as_secs(),
                "Request timed out"
            );
            record.error(response::request_timeout(), REASON_REQUEST_TIMEOUT)
        }
    }
}

async fn admit_and_forward(
    state: &AppState,
    identity: &ClientIdentity,
    peer: SocketAddr,
    request: Request<Body>,
    id: &str,
) -> Outcome {
    let rate_key = identity.rate_key();
    let max_requests = state.policy.threshold(rate_key.scope());

    let admitted = match state
        .limiter
        .allow(rate_key.as_str(), state.policy.window_secs, max_requests)
        .await
    {
        Ok(admitted) => admitted,
        Err(e) => {
            tracing::error!(
                request_id = %id,
                key = %rate_key,
                error = %e,
                "Rate limiter unavailable, rejecting request"
            );
            return Outcome::Failed(response::internal_error(), REASON_LIMITER_UNAVAILABLE);
        }
    };

    if !admitted {
        tracing::debug!(
            request_id = %id,
            key = %rate_key,
            max_requests,
            "Rate limit exceeded"
        );
        return Outcome::Blocked;
    }

    match state.forwarder.forward(request, peer).await {
        Ok(response) => Outcome::Allowed(response),
        Err(e) => {
            tracing::warn!(request_id = %id, error = %e, "Upstream error");
            Outcome::Failed(response::upstream_unavailable(), REASON_UPSTREAM_UNAVAILABLE)
        }
    }
}

/// Outcome accumulator for one request; emits on drop.
struct PipelineRecord {
    dispatcher: EventDispatcher,
    edge_node: Arc<str>,
    started: Instant,
    client_ip: String,
    api_key: Option<String>,
    path: String,
    method: String,
    fingerprint: Option<BTreeMap<String, String>>,
    recorder: StatusRecorder,
    decision: Decision,
    reason: Option<&'static str>,
}

impl PipelineRecord {
    fn begin(state: &AppState, request: &Request<Body>, identity: &ClientIdentity) -> Self {
        Self {
            dispatcher: state.dispatcher.clone(),
            edge_node: state.edge_node.clone(),
            started: Instant::now(),
            client_ip: identity.client_ip.clone(),
            api_key: identity.api_key.clone(),
            path: request.uri().path().to_string(),
            method: request.method().to_string(),
            fingerprint: fingerprint(request.headers()),
            recorder: StatusRecorder::new(),
            // Until a branch completes, the request counts as abandoned.
            decision: Decision::Error,
            reason: Some(REASON_CANCELLED),
        }
    }

    fn allowed(mut self, response: Response<Body>) -> Response<Body> {
        self.decision = Decision::Allowed;
        self.reason = None;
        self.recorder.observe(response)
    }

    fn blocked(mut self, response: Response<Body>) -> Response<Body> {
        self.decision = Decision::Blocked;
        self.reason = Some(REASON_RATE_LIMIT);
        self.recorder.observe(response)
    }

    fn error(mut self, response: Response<Body>, reason: &'static str) -> Response<Body> {
        self.decision = Decision::Error;
        self.reason = Some(reason);
        self.recorder.observe(response)
    }
}

impl Drop for PipelineRecord {
    fn drop(&mut self) {
        metrics::record_request(&self.method, self.decision, self.started);

        let status = self
            .recorder
            .status()
            .map(|s| s.as_u16())
            .unwrap_or(CLIENT_CLOSED_REQUEST);
        let score = match self.decision {
            Decision::Blocked => BLOCKED_SCORE,
            _ => 0.0,
        };

        let event = Event {
            timestamp: Utc::now(),
            edge_node: self.edge_node.to_string(),
            client_ip: std::mem::take(&mut self.client_ip),
            api_key: self.api_key.take(),
            path: std::mem::take(&mut self.path),
            method: std::mem::take(&mut self.method),
            status,
            decision: self.decision,
            reason: self.reason.map(str::to_string),
            score,
            fingerprint: self.fingerprint.take(),
        };

        // A full queue is already counted and logged by the dispatcher.
        let _ = self.dispatcher.enqueue(event);
    }
}
