//! Redis-backed sliding-window limiter.
//!
//! Each key is a sorted set of request entries scored by their millisecond
//! timestamp. One `MULTI`/`EXEC` transaction prunes, inserts, refreshes the
//! TTL, and counts, so concurrent callers for the same key (from this
//! process or any other instance sharing the store) never observe a stale
//! count.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};

use crate::security::rate_limit::{window_millis, Limiter, StoreError};

/// Generates unique sorted-set members for same-millisecond entries.
///
/// Members are `<now_ms>:<instance>:<sequence>`. The sequence is an atomic
/// counter owned by this generator; the instance tag keeps members from
/// different proxy processes apart.
#[derive(Debug)]
pub struct EntryIds {
    instance: String,
    sequence: AtomicU64,
}

impl EntryIds {
    pub fn new() -> Self {
        Self::with_instance(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn with_instance(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn next(&self, now_ms: i64) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}:{}:{}", now_ms, self.instance, seq)
    }
}

impl Default for EntryIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Limiter whose state lives entirely in Redis.
pub struct RedisLimiter {
    connection: ConnectionManager,
    ids: EntryIds,
    timeout: Duration,
}

impl RedisLimiter {
    /// Connect to the store at `url`, bounding connection setup and every
    /// later operation by `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;

        Ok(Self::new(connection, timeout))
    }

    pub fn new(connection: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection,
            ids: EntryIds::new(),
            timeout,
        }
    }

    /// Round-trip a `PING` to verify the store is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let result: RedisResult<String> = tokio::time::timeout(
            self.timeout,
            redis::cmd("PING").query_async(&mut connection),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.timeout))?;
        result?;
        Ok(())
    }

    /// Run the admission check as of `now_ms` (milliseconds since the epoch).
    pub async fn allow_at(
        &self,
        key: &str,
        now_ms: i64,
        window_secs: u64,
        max_requests: u64,
    ) -> Result<bool, StoreError> {
        let window_ms = window_millis(window_secs)?;
        let window_start = now_ms.saturating_sub(window_ms);
        let member = self.ids.next(now_ms);

        let mut pipe = redis::pipe();
        pipe.atomic()
            // "(" makes the bound exclusive: only entries strictly older than
            // the window start are pruned.
            .zrembyscore(key, "-inf", format!("({}", window_start))
            .ignore()
            .zadd(key, &member, now_ms)
            .ignore()
            .expire(key, window_ms / 1000)
            .ignore()
            .zcard(key);

        let mut connection = self.connection.clone();
        let result: RedisResult<(u64,)> =
            tokio::time::timeout(self.timeout, pipe.query_async(&mut connection))
                .await
                .map_err(|_| StoreError::Timeout(self.timeout))?;
        let (count,) = result?;

        tracing::trace!(key = %key, count, max_requests, "Sliding window checked");
        Ok(count <= max_requests)
    }
}

#[async_trait]
impl Limiter for RedisLimiter {
    async fn allow(&self, key: &str, window_secs: u64, max_requests: u64) -> Result<bool, StoreError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.allow_at(key, now_ms, window_secs, max_requests).await
    }
}
