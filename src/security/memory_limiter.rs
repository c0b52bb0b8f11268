//! In-process sliding-window limiter.
//!
//! Same algorithm as the Redis limiter, with the per-key entry list held in
//! a `DashMap`. The shard lock taken by `entry()` makes prune, insert and
//! count one atomic step per key. Only meaningful for a single instance, so
//! it serves as a test double and for local development.
//!
//! Keys whose newest entry has left the window are evicted every
//! `SWEEP_INTERVAL` checks, the in-process counterpart of the store's TTL.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::security::rate_limit::{window_millis, Limiter, StoreError};

const SWEEP_INTERVAL: u64 = 1024;

#[derive(Debug, Default)]
pub struct MemoryLimiter {
    windows: DashMap<String, VecDeque<i64>>,
    unavailable: AtomicBool,
    checks: AtomicU64,
}

impl MemoryLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A limiter that fails every check, simulating a store outage.
    pub fn unavailable() -> Self {
        let limiter = Self::default();
        limiter.set_unavailable(true);
        limiter
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Run the admission check as of `now_ms`.
    pub fn allow_at(
        &self,
        key: &str,
        now_ms: i64,
        window_secs: u64,
        max_requests: u64,
    ) -> Result<bool, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory limiter marked unavailable".into()));
        }

        let window_start = now_ms.saturating_sub(window_millis(window_secs)?);

        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.sweep(window_start);
        }
        let mut entries = self.windows.entry(key.to_string()).or_default();

        entries.retain(|&ts| ts >= window_start);
        entries.push_back(now_ms);

        Ok(entries.len() as u64 <= max_requests)
    }

    /// Drop every key with no entry inside the window ending at `now_ms`.
    /// Returns the number of keys removed.
    pub fn evict_idle(&self, now_ms: i64, window_secs: u64) -> Result<usize, StoreError> {
        let window_start = now_ms.saturating_sub(window_millis(window_secs)?);
        Ok(self.sweep(window_start))
    }

    // Must not be called while holding a map guard.
    fn sweep(&self, window_start: i64) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, entries| entries.back().is_some_and(|&newest| newest >= window_start));
        before.saturating_sub(self.windows.len())
    }

    /// Number of keys currently tracked.
    pub fn keys(&self) -> usize {
        self.windows.len()
    }

    /// Entries currently held for `key`, without pruning.
    pub fn entries(&self, key: &str) -> usize {
        self.windows.get(key).map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Limiter for MemoryLimiter {
    async fn allow(&self, key: &str, window_secs: u64, max_requests: u64) -> Result<bool, StoreError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.allow_at(key, now_ms, window_secs, max_requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_threshold_is_inclusive() {
        let limiter = MemoryLimiter::new();
        for _ in 0..5 {
            assert!(limiter.allow_at("ip:a", 1_000, 60, 5).unwrap());
        }
        assert!(!limiter.allow_at("ip:a", 1_000, 60, 5).unwrap());
    }

    #[test]
    fn test_expired_entries_do_not_count() {
        let limiter = MemoryLimiter::new();
        assert!(limiter.allow_at("ip:a", 0, 10, 2).unwrap());
        assert!(limiter.allow_at("ip:a", 1_000, 10, 2).unwrap());
        assert!(!limiter.allow_at("ip:a", 2_000, 10, 2).unwrap());

        // At t=10.5s the entry from t=0 has left the window.
        assert!(!limiter.allow_at("ip:a", 10_500, 10, 2).unwrap());
        // At t=12s only the entries from 2s and 10.5s remain before this one.
        assert!(limiter.allow_at("ip:a", 12_000, 10, 3).unwrap());
        // Far in the future everything has expired.
        assert!(limiter.allow_at("ip:a", 60_000, 10, 2).unwrap());
        assert_eq!(limiter.entries("ip:a"), 1);
    }

    #[test]
    fn test_denied_requests_still_count() {
        let limiter = MemoryLimiter::new();
        assert!(limiter.allow_at("ip:a", 0, 10, 1).unwrap());
        assert!(!limiter.allow_at("ip:a", 100, 10, 1).unwrap());
        assert_eq!(limiter.entries("ip:a"), 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = MemoryLimiter::new();
        assert!(limiter.allow_at("ip:a", 0, 60, 1).unwrap());
        assert!(!limiter.allow_at("ip:a", 0, 60, 1).unwrap());
        assert!(limiter.allow_at("api_key:a", 0, 60, 1).unwrap());
    }

    #[test]
    fn test_unavailable_is_an_error_not_a_decision() {
        let limiter = MemoryLimiter::unavailable();
        assert!(matches!(
            limiter.allow_at("ip:a", 0, 60, 10),
            Err(StoreError::Unavailable(_))
        ));
        limiter.set_unavailable(false);
        assert!(limiter.allow_at("ip:a", 0, 60, 10).unwrap());
    }

    #[test]
    fn test_idle_keys_are_evicted() {
        let limiter = MemoryLimiter::new();
        assert!(limiter.allow_at("ip:old", 0, 10, 5).unwrap());
        assert!(limiter.allow_at("ip:recent", 9_000, 10, 5).unwrap());

        assert_eq!(limiter.evict_idle(15_000, 10).unwrap(), 1);
        assert_eq!(limiter.keys(), 1);
        assert_eq!(limiter.entries("ip:old"), 0);
        assert_eq!(limiter.entries("ip:recent"), 1);
    }

    #[test]
    fn test_periodic_sweep_bounds_key_count() {
        let limiter = MemoryLimiter::new();
        for i in 0..(SWEEP_INTERVAL - 1) {
            assert!(limiter.allow_at(&format!("ip:{}", i), 0, 10, 5).unwrap());
        }
        assert_eq!(limiter.keys(), (SWEEP_INTERVAL - 1) as usize);

        // The next check, a minute later, triggers a sweep of all idle keys.
        assert!(limiter.allow_at("ip:late", 60_000, 10, 5).unwrap());
        assert_eq!(limiter.keys(), 1);
        assert_eq!(limiter.entries("ip:late"), 1);
    }

    #[test]
    fn test_oversized_window_is_an_error_not_an_admit() {
        let limiter = MemoryLimiter::new();
        for window_secs in [u64::MAX, 1 << 62] {
            assert!(matches!(
                limiter.allow_at("ip:a", 1_000, window_secs, 2),
                Err(StoreError::InvalidWindow(w)) if w == window_secs
            ));
        }
        assert_eq!(limiter.entries("ip:a"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_match_serial_count() {
        let limiter = Arc::new(MemoryLimiter::new());
        let admitted = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let limiter = limiter.clone();
                let admitted = admitted.clone();
                tokio::spawn(async move {
                    // Coincident timestamps on purpose.
                    if limiter.allow_at("ip:burst", 5_000, 60, 50).unwrap() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 50);
        assert_eq!(limiter.entries("ip:burst"), 200);
    }
}
