//! Delivery of event batches to the ingest sink.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::events::event::Event;

/// Errors that can occur while delivering events.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The batch could not be serialized.
    #[error("failed to encode events: {0}")]
    Encode(#[from] serde_json::Error),

    /// The sink did not answer in time.
    #[error("ingest request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection or protocol failure.
    #[error("ingest request failed: {0}")]
    Transport(String),

    /// The sink answered with a non-success status.
    #[error("ingest service returned status {0}")]
    Status(u16),
}

/// Something that can emit telemetry events to a downstream system.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, events: &[Event]) -> Result<(), PublishError>;
}

/// Posts event batches as a JSON array to the ingest endpoint.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpPublisher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, events: &[Event]) -> Result<(), PublishError> {
        if events.is_empty() {
            return Ok(());
        }

        // Serialized up front so the body goes out as a single write.
        let payload = serde_json::to_vec(events)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::Timeout(self.timeout)
                } else {
                    PublishError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Status(status.as_u16()));
        }

        Ok(())
    }
}

/// In-memory publisher that records every delivered batch.
///
/// Can be switched into a failing mode to simulate an unavailable sink.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<Event>>,
    calls: Mutex<usize>,
    fail_with_status: Option<u16>,
    delay: Option<Duration>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every call fails with the given status.
    pub fn failing(status: u16) -> Self {
        Self {
            fail_with_status: Some(status),
            ..Self::default()
        }
    }

    /// Sleep before each delivery, to simulate a slow sink.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Events successfully delivered so far, in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of publish calls, successful or not.
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, events: &[Event]) -> Result<(), PublishError> {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(status) = self.fail_with_status {
            return Err(PublishError::Status(status));
        }

        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(events);
        Ok(())
    }
}
