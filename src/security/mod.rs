//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (client IP, API key, fingerprint)
//!     → rate_limit.rs (scope + threshold, Limiter capability)
//!     → redis_limiter.rs (shared sliding window, one transaction per check)
//!     → headers.rs (sanitize, add X-Forwarded-For) before forwarding
//! ```
//!
//! # Design Decisions
//! - Fail closed: a limiter that cannot decide rejects the request
//! - Rate-limit state lives in the shared store, never in process memory
//! - memory_limiter.rs mirrors the store algorithm for tests and local runs

pub mod headers;
pub mod identity;
pub mod memory_limiter;
pub mod rate_limit;
pub mod redis_limiter;

pub use identity::{ClientIdentity, API_KEY_HEADER, FORWARDED_FOR_HEADER};
pub use memory_limiter::MemoryLimiter;
pub use rate_limit::{AdmissionPolicy, Limiter, RateKey, RateScope, StoreError};
pub use redis_limiter::RedisLimiter;
