//! Client identity and fingerprint extraction.
//!
//! # Responsibilities
//! - Resolve the client IP (first `X-Forwarded-For` entry, else the peer)
//! - Pick the rate-limit identity (API key wins over IP)
//! - Collect fingerprint signals from optional headers

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::http::{header, HeaderMap};

use crate::security::rate_limit::{RateKey, RateScope};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Who a request is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_ip: String,
    pub api_key: Option<String>,
}

impl ClientIdentity {
    pub fn from_request(headers: &HeaderMap, peer: SocketAddr) -> Self {
        Self {
            client_ip: client_ip(headers, peer),
            api_key: header_value(headers, API_KEY_HEADER),
        }
    }

    pub fn scope(&self) -> RateScope {
        if self.api_key.is_some() {
            RateScope::ApiKey
        } else {
            RateScope::Ip
        }
    }

    pub fn rate_key(&self) -> RateKey {
        match &self.api_key {
            Some(key) => RateKey::new(RateScope::ApiKey, key),
            None => RateKey::new(RateScope::Ip, &self.client_ip),
        }
    }
}

/// First `X-Forwarded-For` entry, trimmed; otherwise the transport peer IP.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

/// User agent and referer, keyed `ua` and `referer`.
///
/// Returns `None` when neither header is present, never an empty map.
pub fn fingerprint(headers: &HeaderMap) -> Option<BTreeMap<String, String>> {
    let mut signals = BTreeMap::new();
    if let Some(ua) = header_value(headers, header::USER_AGENT.as_str()) {
        signals.insert("ua".to_string(), ua);
    }
    if let Some(referer) = header_value(headers, header::REFERER.as_str()) {
        signals.insert("referer".to_string(), referer);
    }

    if signals.is_empty() {
        None
    } else {
        Some(signals)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
