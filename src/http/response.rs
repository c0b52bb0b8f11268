//! Response helpers.
//!
//! # Responsibilities
//! - Build the short plaintext responses the edge answers with itself
//! - Capture the status a request was answered with (first write wins)

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

/// Nginx's "client closed request"; used when the pipeline never finished.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Remembers the first status set for a response and ignores later writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusRecorder {
    status: Option<StatusCode>,
}

impl StatusRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` unless one was already recorded. Returns the status
    /// that is now in effect.
    pub fn record(&mut self, status: StatusCode) -> StatusCode {
        *self.status.get_or_insert(status)
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Pass a response through, recording its status.
    pub fn observe(&mut self, response: Response<Body>) -> Response<Body> {
        self.record(response.status());
        response
    }
}

/// A `text/plain` response with the given status and body.
pub fn plain_text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn rate_limited() -> Response<Body> {
    plain_text(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
}

pub fn request_timeout() -> Response<Body> {
    plain_text(StatusCode::REQUEST_TIMEOUT, "Request Timeout")
}

pub fn internal_error() -> Response<Body> {
    plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

pub fn upstream_unavailable() -> Response<Body> {
    plain_text(StatusCode::BAD_GATEWAY, "Upstream unavailable")
}
