//! Header manipulation for forwarded requests.
//!
//! # Responsibilities
//! - Append the client IP to X-Forwarded-For
//! - Strip hop-by-hop headers
//!
//! # Design Decisions
//! - Preserve the existing X-Forwarded-For chain, append the peer
//! - Headers named in `Connection` are treated as hop-by-hop too

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::security::identity::FORWARDED_FOR_HEADER;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove headers that only apply to a single transport hop.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Append `peer_ip` to X-Forwarded-For (or create it if missing).
pub fn append_forwarded_for(headers: &mut HeaderMap, peer_ip: &str) {
    let value = match headers.get(FORWARDED_FOR_HEADER).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, peer_ip),
        _ => peer_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(FORWARDED_FOR_HEADER, value);
    }
}
