//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     one cancellation token
//!         → delivery worker stops, queued events discarded
//!         → HTTP server stops accepting, drains for the grace period
//! ```
//!
//! # Design Decisions
//! - Ordered startup lives in main.rs: config, logging, metrics, store,
//!   dispatcher, listener
//! - Shutdown has a deadline: in-flight requests are abandoned after it

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
