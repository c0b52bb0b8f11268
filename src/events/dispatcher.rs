//! Asynchronous, best-effort delivery of telemetry events.
//!
//! # Responsibilities
//! - Accept events from request workers without ever blocking them
//! - Shed load when the bounded queue is full
//! - Deliver events one at a time to the ingest sink from a single task
//!
//! # Design Decisions
//! - Bounded `mpsc` channel: many producers, one consumer, FIFO
//! - `enqueue` uses `try_send`; a full queue drops the event and counts it
//! - No retries: a failed delivery is a lost event
//! - Cancellation stops the worker immediately; queued events are discarded
//!   and counted, never flushed

use std::slice;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::events::event::Event;
use crate::events::publisher::{PublishError, Publisher};
use crate::observability::metrics;

/// Reasons an event was not accepted for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Queue saturated; the event was dropped.
    #[error("event queue is full")]
    QueueFull,

    /// The delivery worker has shut down.
    #[error("event dispatcher is closed")]
    Closed,
}

/// Counters shared between the dispatcher handles and the worker.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    depth: AtomicUsize,
}

impl DispatcherStats {
    /// Events accepted into the queue.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Events shed because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events the sink accepted.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Deliveries that failed or timed out.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Events lost to shutdown, queued or in flight.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Events currently waiting in the queue.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Producer handle. Cheap to clone; one per request worker is fine.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<Event>,
    stats: Arc<DispatcherStats>,
}

impl EventDispatcher {
    /// Create a dispatcher with the given queue capacity.
    ///
    /// Returns the producer handle and the worker that must be spawned to
    /// drain the queue. `capacity` must be non-zero.
    pub fn new(
        capacity: usize,
        publisher: Arc<dyn Publisher>,
        delivery_timeout: Duration,
    ) -> (Self, DeliveryWorker) {
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(DispatcherStats::default());

        let dispatcher = Self {
            tx,
            stats: stats.clone(),
        };
        let worker = DeliveryWorker {
            rx,
            publisher,
            stats,
            delivery_timeout,
            capacity,
        };
        (dispatcher, worker)
    }

    /// Schedule an event for delivery. Never waits.
    pub fn enqueue(&self, event: Event) -> Result<(), DispatchError> {
        // Counted before the send so the worker's decrement never runs first.
        self.stats.depth.fetch_add(1, Ordering::Relaxed);

        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::set_queue_depth(self.stats.depth());
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                self.stats.depth.fetch_sub(1, Ordering::Relaxed);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_dropped_event();
                tracing::warn!(
                    method = %event.method,
                    path = %event.path,
                    "Dropping telemetry event: queue full"
                );
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(event)) => {
                self.stats.depth.fetch_sub(1, Ordering::Relaxed);
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    method = %event.method,
                    path = %event.path,
                    "Dropping telemetry event: dispatcher closed"
                );
                Err(DispatchError::Closed)
            }
        }
    }

    pub fn stats(&self) -> &Arc<DispatcherStats> {
        &self.stats
    }
}

/// Summary returned by [`DeliveryWorker::run`] once it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    pub delivered: u64,
    pub failed: u64,
    pub discarded: u64,
}

/// Single consumer that owns the receiving end of the queue.
pub struct DeliveryWorker {
    rx: mpsc::Receiver<Event>,
    publisher: Arc<dyn Publisher>,
    stats: Arc<DispatcherStats>,
    delivery_timeout: Duration,
    capacity: usize,
}

impl DeliveryWorker {
    /// Drain the queue into the publisher until `cancel` fires or every
    /// producer handle is dropped.
    pub async fn run(mut self, cancel: CancellationToken) -> DeliveryReport {
        tracing::info!(
            capacity = self.capacity,
            timeout_ms = self.delivery_timeout.as_millis() as u64,
            "Event dispatcher starting"
        );

        let mut report = DeliveryReport::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            self.stats.depth.fetch_sub(1, Ordering::Relaxed);
            metrics::set_queue_depth(self.stats.depth());

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.discarded += 1;
                    break;
                }
                result = self.deliver(&event) => result,
            };

            match result {
                Ok(()) => {
                    report.delivered += 1;
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    report.failed += 1;
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::record_ingest_failure();
                    tracing::warn!(
                        error = %e,
                        method = %event.method,
                        path = %event.path,
                        "Failed to deliver event to ingest"
                    );
                }
            }
        }

        report.discarded += self.discard_pending();
        self.stats.discarded.fetch_add(report.discarded, Ordering::Relaxed);
        if report.discarded > 0 {
            metrics::record_discarded_events(report.discarded);
        }
        metrics::set_queue_depth(self.stats.depth());

        tracing::info!(
            delivered = report.delivered,
            failed = report.failed,
            discarded = report.discarded,
            "Event dispatcher stopped"
        );
        report
    }

    async fn deliver(&self, event: &Event) -> Result<(), PublishError> {
        match tokio::time::timeout(
            self.delivery_timeout,
            self.publisher.publish(slice::from_ref(event)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.delivery_timeout)),
        }
    }

    /// Close the queue and throw away whatever is still in it.
    fn discard_pending(&mut self) -> u64 {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            self.stats.depth.fetch_sub(1, Ordering::Relaxed);
            discarded += 1;
        }
        discarded
    }
}
