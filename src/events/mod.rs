//! Telemetry events subsystem.
//!
//! # Data Flow
//! ```text
//! request pipeline
//!     → event.rs (one Event per request)
//!     → dispatcher.rs (EventDispatcher::enqueue, non-blocking)
//!     → bounded queue
//!     → dispatcher.rs (DeliveryWorker, single background task)
//!     → publisher.rs (HttpPublisher → ingest sink)
//! ```
//!
//! # Design Decisions
//! - Telemetry is strictly lower priority than serving traffic
//! - At-most-once delivery: no retries, no flush at shutdown
//! - Publisher is a trait so the sink can be swapped in tests

pub mod dispatcher;
pub mod event;
pub mod publisher;

pub use dispatcher::{DeliveryReport, DeliveryWorker, DispatchError, DispatcherStats, EventDispatcher};
pub use event::{Decision, Event, BLOCKED_SCORE};
pub use publisher::{HttpPublisher, MemoryPublisher, PublishError, Publisher};
