//! Edge admission-control proxy library.
//!
//! Sits in front of a single origin, admits or rejects each request against
//! shared sliding-window limits, and reports one telemetry event per request
//! to an ingest service without ever delaying the response.

pub mod config;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::EdgeConfig;
pub use events::{Event, EventDispatcher};
pub use http::{AppState, EdgeServer};
pub use lifecycle::Shutdown;
