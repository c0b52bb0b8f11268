//! Sliding-window admission control.
//!
//! The limiter answers one question: may another request for `key` proceed
//! within the trailing `window_secs`, given at most `max_requests`? The
//! request being checked counts toward the total, so the boundary is
//! inclusive: the `max_requests`-th request passes, the next one does not.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::RateLimitConfig;

/// Failure to reach a decision. Never an implicit admit or deny.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store did not answer within the configured timeout.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store rejected the command or the connection broke.
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Any other backend failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The window does not fit millisecond timestamps.
    #[error("window of {0}s is out of range")]
    InvalidWindow(u64),
}

/// Longest window accepted by config validation (one week).
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// Window length in milliseconds.
///
/// Errors instead of wrapping, so an oversized window can never turn into a
/// negative span that prunes every entry.
pub fn window_millis(window_secs: u64) -> Result<i64, StoreError> {
    i64::try_from(window_secs)
        .ok()
        .and_then(|secs| secs.checked_mul(1000))
        .ok_or(StoreError::InvalidWindow(window_secs))
}

/// Admission decision capability shared by the store-backed limiter and
/// in-memory doubles.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Record a request for `key` and report whether it is within limits.
    async fn allow(&self, key: &str, window_secs: u64, max_requests: u64) -> Result<bool, StoreError>;
}

/// Which identity a request is limited by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateScope {
    Ip,
    ApiKey,
}

impl RateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateScope::Ip => "ip",
            RateScope::ApiKey => "api_key",
        }
    }
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store key for a scoped identity, e.g. `ip:203.0.113.9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    scope: RateScope,
    key: String,
}

impl RateKey {
    pub fn new(scope: RateScope, identity: &str) -> Self {
        Self {
            scope,
            key: format!("{}:{}", scope.as_str(), identity),
        }
    }

    pub fn scope(&self) -> RateScope {
        self.scope
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Window and per-scope thresholds applied by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub window_secs: u64,
    pub ip_max_requests: u64,
    pub api_key_max_requests: u64,
}

impl AdmissionPolicy {
    pub fn threshold(&self, scope: RateScope) -> u64 {
        match scope {
            RateScope::Ip => self.ip_max_requests,
            RateScope::ApiKey => self.api_key_max_requests,
        }
    }
}

impl From<&RateLimitConfig> for AdmissionPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            window_secs: config.window_secs,
            ip_max_requests: config.ip_max_requests,
            api_key_max_requests: config.api_key_max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_key_format() {
        assert_eq!(RateKey::new(RateScope::Ip, "10.1.2.3").as_str(), "ip:10.1.2.3");
        assert_eq!(RateKey::new(RateScope::ApiKey, "abc").to_string(), "api_key:abc");
    }

    #[test]
    fn test_same_value_different_scope_is_different_key() {
        let ip = RateKey::new(RateScope::Ip, "shared");
        let api = RateKey::new(RateScope::ApiKey, "shared");
        assert_ne!(ip, api);
    }

    #[test]
    fn test_policy_threshold_by_scope() {
        let policy = AdmissionPolicy::from(&RateLimitConfig::default());
        assert_eq!(policy.threshold(RateScope::Ip), 100);
        assert_eq!(policy.threshold(RateScope::ApiKey), 1000);
    }

    #[test]
    fn test_window_millis_rejects_overflow() {
        assert_eq!(window_millis(60).unwrap(), 60_000);
        assert_eq!(window_millis(MAX_WINDOW_SECS).unwrap(), 604_800_000);
        assert!(matches!(window_millis(u64::MAX), Err(StoreError::InvalidWindow(u64::MAX))));
        assert!(matches!(window_millis(1 << 62), Err(StoreError::InvalidWindow(_))));
        let policy = AdmissionPolicy::from(&RateLimitConfig::default());
        assert_eq!(policy.window_secs, 60);
    }
}
