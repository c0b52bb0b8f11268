//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::{EdgeConfig, LogFormat};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {message}")]
    Env { key: &'static str, message: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides, and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<EdgeConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => EdgeConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment values onto `config`.
///
/// `lookup` resolves a variable name; empty values are treated as unset.
pub fn apply_env_overrides<F>(config: &mut EdgeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

    if let Some(value) = get("EDGE_LISTEN_ADDR") {
        config.listener.bind_address = value;
    }
    if let Some(value) = get("REDIS_ADDR") {
        config.store.address = value;
    }
    if let Some(value) = get("ORIGIN_URL") {
        config.origin.url = value;
    }
    if let Some(value) = get("INGEST_SERVICE_URL") {
        config.ingest.url = value;
    }
    if let Some(value) = get("EDGE_NODE_NAME") {
        config.edge.node_name = value;
    }
    if let Some(value) = get("EDGE_LOG_LEVEL") {
        config.observability.log_level = value;
    }
    if let Some(value) = get("EDGE_LOG_FORMAT") {
        config.observability.log_format = parse::<LogFormat>("EDGE_LOG_FORMAT", &value)?;
    }

    set_parsed(&get, "REDIS_TIMEOUT_MS", &mut config.store.timeout_ms)?;
    set_parsed(&get, "ORIGIN_TIMEOUT_SECS", &mut config.origin.timeout_secs)?;
    set_parsed(&get, "INGEST_HTTP_TIMEOUT_MS", &mut config.ingest.timeout_ms)?;
    set_parsed(&get, "RATE_LIMIT_WINDOW_SECONDS", &mut config.rate_limit.window_secs)?;
    set_parsed(&get, "RATE_LIMIT_IP_MAX", &mut config.rate_limit.ip_max_requests)?;
    set_parsed(&get, "RATE_LIMIT_API_KEY_MAX", &mut config.rate_limit.api_key_max_requests)?;
    set_parsed(&get, "EVENT_QUEUE_SIZE", &mut config.events.queue_capacity)?;

    Ok(())
}

fn set_parsed<T, G>(get: &G, key: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(key) {
        *target = parse(key, &value)?;
    }
    Ok(())
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        key,
        message: format!("'{}': {}", value, e),
    })
}
