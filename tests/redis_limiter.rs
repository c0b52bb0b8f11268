//! Integration tests for the Redis-backed limiter.
//!
//! These tests require a Redis instance at `REDIS_URL` (default
//! `redis://127.0.0.1/`). Tests are ignored by default - run with
//! `cargo test --test redis_limiter -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use edge_gate::security::{Limiter, RedisLimiter};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
}

/// Connect, or `None` when no store is reachable.
async fn connect() -> Option<RedisLimiter> {
    let limiter = RedisLimiter::connect(&redis_url(), Duration::from_millis(500)).await.ok()?;
    limiter.ping().await.ok()?;
    Some(limiter)
}

/// A key no other test run has used.
fn fresh_key(test_name: &str) -> String {
    format!("test:{}:{}", test_name, uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_threshold_is_inclusive() {
    let Some(limiter) = connect().await else {
        eprintln!("Skipping test: Redis not available at {}", redis_url());
        return;
    };
    let key = fresh_key("threshold");

    for i in 1..=3 {
        assert!(limiter.allow(&key, 60, 3).await.unwrap(), "request {} should pass", i);
    }
    assert!(!limiter.allow(&key, 60, 3).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_old_entries_leave_the_window() {
    let Some(limiter) = connect().await else {
        eprintln!("Skipping test: Redis not available");
        return;
    };
    let key = fresh_key("expiry");
    let base = chrono::Utc::now().timestamp_millis();

    assert!(limiter.allow_at(&key, base, 10, 2).await.unwrap());
    assert!(limiter.allow_at(&key, base + 1_000, 10, 2).await.unwrap());
    assert!(!limiter.allow_at(&key, base + 2_000, 10, 2).await.unwrap());

    // At base + 11.5s only the entries from base + 2s onward remain.
    assert!(limiter.allow_at(&key, base + 11_500, 10, 2).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_same_millisecond_entries_all_count() {
    let Some(limiter) = connect().await else {
        eprintln!("Skipping test: Redis not available");
        return;
    };
    let key = fresh_key("same_ms");
    let now = chrono::Utc::now().timestamp_millis();

    let mut admitted = 0;
    for _ in 0..10 {
        if limiter.allow_at(&key, now, 60, 5).await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_concurrent_checks_do_not_overcount() {
    let Some(limiter) = connect().await else {
        eprintln!("Skipping test: Redis not available");
        return;
    };
    let limiter = Arc::new(limiter);
    let key = Arc::new(fresh_key("concurrent"));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let limiter = limiter.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { limiter.allow(&key, 60, 40).await.unwrap() }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 40);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_key_expires_with_the_window() {
    let Some(limiter) = connect().await else {
        eprintln!("Skipping test: Redis not available");
        return;
    };
    let key = fresh_key("ttl");

    assert!(limiter.allow(&key, 30, 5).await.unwrap());

    let client = redis::Client::open(redis_url()).unwrap();
    let mut connection = client.get_multiplexed_async_connection().await.unwrap();
    let ttl: i64 = redis::cmd("TTL").arg(&key).query_async(&mut connection).await.unwrap();
    assert!((1..=30).contains(&ttl), "unexpected TTL {}", ttl);
}

#[tokio::test]
async fn test_unreachable_store_fails_to_connect() {
    // Port 1 on localhost is never a Redis server.
    let result = RedisLimiter::connect("redis://127.0.0.1:1/", Duration::from_millis(300)).await;
    assert!(result.is_err());
}
