//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (window, thresholds, capacity, timeouts > 0)
//! - Validate addresses and URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EdgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::EdgeConfig;
use crate::security::rate_limit::MAX_WINDOW_SECS;

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} is not a valid URL for this setting: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be at most {max}")]
    TooLarge { field: &'static str, max: u64 },
}

/// Check the configuration, collecting every failed rule.
pub fn validate_config(config: &EdgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.edge.node_name.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "edge.node_name" });
    }
    if config.store.address.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "store.address" });
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    // The origin forwarder speaks plain HTTP only.
    check_url(&mut errors, "origin.url", &config.origin.url, &["http"]);
    check_url(&mut errors, "ingest.url", &config.ingest.url, &["http", "https"]);

    let positive = [
        ("rate_limit.window_secs", config.rate_limit.window_secs),
        ("rate_limit.ip_max_requests", config.rate_limit.ip_max_requests),
        ("rate_limit.api_key_max_requests", config.rate_limit.api_key_max_requests),
        ("events.queue_capacity", config.events.queue_capacity as u64),
        ("listener.max_body_bytes", config.listener.max_body_bytes as u64),
        ("store.timeout_ms", config.store.timeout_ms),
        ("origin.timeout_secs", config.origin.timeout_secs),
        ("ingest.timeout_ms", config.ingest.timeout_ms),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.rate_limit.window_secs > MAX_WINDOW_SECS {
        errors.push(ValidationError::TooLarge {
            field: "rate_limit.window_secs",
            max: MAX_WINDOW_SECS,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_url(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    value: &str,
    schemes: &[&str],
) {
    let valid = Url::parse(value)
        .map(|url| schemes.contains(&url.scheme()) && url.host().is_some())
        .unwrap_or(false);
    if !valid {
        errors.push(ValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
}
