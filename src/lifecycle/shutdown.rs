//! Shutdown coordination for the edge node.

use tokio_util::sync::CancellationToken;

/// Coordinator for shutdown.
///
/// Wraps one cancellation token that every long-running task observes: the
/// HTTP server starts its graceful drain and the event delivery worker stops
/// immediately.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The token background tasks select on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}
