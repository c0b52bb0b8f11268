//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers, /healthz bypass)
//!     → request.rs (request ID)
//!     → handler.rs (identify → admit-check → reject | forward → record)
//!     → forward.rs (origin call)
//!     → response.rs (status capture, edge-generated responses)
//!     → Send to client
//! ```

pub mod forward;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use forward::{Forwarder, OriginForwarder, UpstreamError};
pub use request::X_REQUEST_ID;
pub use server::{AppState, EdgeServer, HEALTH_PATH};
