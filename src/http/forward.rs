//! Forwarding of admitted requests to the origin.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the configured origin
//! - Sanitize headers and append X-Forwarded-For
//! - Bound the origin call with a timeout
//! - Stream the origin response back unchanged

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::uri::{Authority, Scheme};
use axum::http::{Request, Response, Uri, Version};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use url::Url;

use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};

/// Errors on the way to or from the origin.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The configured origin URL cannot be used.
    #[error("invalid origin URL '{0}'")]
    InvalidOrigin(String),

    /// The inbound request could not be mapped onto the origin.
    #[error("cannot build upstream request: {0}")]
    InvalidRequest(String),

    /// The origin did not answer in time.
    #[error("origin did not respond within {0:?}")]
    Timeout(Duration),

    /// Connection refused, reset, or protocol error.
    #[error("origin request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
}

/// Forwards an admitted request and returns the origin's response.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: Request<Body>, peer: SocketAddr) -> Result<Response<Body>, UpstreamError>;
}

/// Reverse proxy to a single plain-HTTP origin.
pub struct OriginForwarder {
    client: Client<HttpConnector, Body>,
    authority: Authority,
    base_path: String,
    timeout: Duration,
}

impl OriginForwarder {
    pub fn new(origin_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let invalid = || UpstreamError::InvalidOrigin(origin_url.to_string());

        let url = Url::parse(origin_url).map_err(|_| invalid())?;
        if url.scheme() != "http" {
            return Err(invalid());
        }
        let host = url.host_str().ok_or_else(invalid)?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let authority = authority.parse::<Authority>().map_err(|_| invalid())?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            authority,
            base_path: url.path().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Map an inbound URI onto the origin, keeping path and query.
    pub fn target_uri(&self, uri: &Uri) -> Result<Uri, UpstreamError> {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let path_and_query = format!("{}{}", self.base_path, path_and_query);

        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl Forwarder for OriginForwarder {
    async fn forward(&self, request: Request<Body>, peer: SocketAddr) -> Result<Response<Body>, UpstreamError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = self.target_uri(&parts.uri)?;
        // Inbound HTTP/2 is downgraded; the origin pool is HTTP/1.1.
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, &peer.ip().to_string());

        let upstream = Request::from_parts(parts, body);
        let response: Response<Incoming> =
            tokio::time::timeout(self.timeout, self.client.request(upstream))
                .await
                .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}
