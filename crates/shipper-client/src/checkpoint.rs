//! Checkpoint stream consumer.
//!
//! Keeps a `PersistedIndex` stream open against the shipper and turns the
//! raw position updates into [`CheckpointEvent`]s:
//!
//! - the first update of a session establishes the endpoint identity
//! - later updates from the same endpoint must not go backwards
//! - an update from a different endpoint is reported as a restart, never
//!   compared against the old index
//!
//! Interrupted streams are reopened with backoff. The position tracker
//! survives reconnects, so the monotonicity rule spans them.

use crate::backoff::BackoffScheduler;
use crate::config::ShipperConfig;
use crate::error::{ShipperError, ShipperResult};
use crate::transport::ProducerTransport;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use shipper_protocol::{EndpointId, PersistedIndexReply, PersistedIndexRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Durable position reported by one shipper instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedPosition {
    pub endpoint_id: EndpointId,
    pub index: u64,
}

impl From<&PersistedIndexReply> for PersistedPosition {
    fn from(reply: &PersistedIndexReply) -> Self {
        Self {
            endpoint_id: reply.endpoint_id,
            index: reply.persisted_index,
        }
    }
}

/// Something the caller should know about the durable position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointEvent {
    /// First position seen.
    Established(PersistedPosition),
    /// Same endpoint, index equal or higher than before.
    Advanced(PersistedPosition),
    /// A different shipper instance answered. Its index space starts over.
    EndpointRestarted {
        previous: PersistedPosition,
        current: PersistedPosition,
    },
    /// The stream was interrupted and will be reopened after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
}

/// Applies the monotonicity rule to a sequence of positions.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    current: Option<PersistedPosition>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<PersistedPosition> {
        self.current
    }

    /// Classify `reply` against the last accepted position.
    ///
    /// A regression under the same endpoint is a protocol violation and
    /// leaves the tracker unchanged.
    pub fn observe(&mut self, reply: &PersistedIndexReply) -> ShipperResult<CheckpointEvent> {
        let next = PersistedPosition::from(reply);

        let event = match self.current {
            None => CheckpointEvent::Established(next),
            Some(previous) if previous.endpoint_id != next.endpoint_id => {
                CheckpointEvent::EndpointRestarted {
                    previous,
                    current: next,
                }
            }
            Some(previous) if next.index < previous.index => {
                return Err(ShipperError::Protocol(format!(
                    "persisted index went backwards for endpoint {}: {} -> {}",
                    next.endpoint_id, previous.index, next.index
                )));
            }
            Some(_) => CheckpointEvent::Advanced(next),
        };

        self.current = Some(next);
        Ok(event)
    }
}

/// Checkpoint consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Interval requested from the shipper between updates.
    pub polling_interval: Duration,
    /// Consecutive interruptions tolerated before giving up.
    pub max_reconnect_attempts: Option<u32>,
    /// Events buffered for a slow caller before the stream is throttled.
    pub channel_capacity: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(1),
            max_reconnect_attempts: None,
            channel_capacity: 64,
        }
    }
}

impl From<&ShipperConfig> for CheckpointConfig {
    fn from(config: &ShipperConfig) -> Self {
        Self {
            polling_interval: config.polling_interval(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            ..Self::default()
        }
    }
}

/// How one stream session ended.
enum SessionEnd {
    /// Cancelled, or nobody is listening anymore.
    Stopped,
    /// Worth reopening.
    Interrupted { received: bool, reason: String },
    Fatal(ShipperError),
}

/// Background task feeding a [`CheckpointHandle`].
pub struct CheckpointConsumer {
    transport: Arc<dyn ProducerTransport>,
    scheduler: BackoffScheduler,
    config: CheckpointConfig,
    tracker: PositionTracker,
    events: mpsc::Sender<ShipperResult<CheckpointEvent>>,
    latest: watch::Sender<Option<PersistedPosition>>,
    cancel: CancellationToken,
}

impl CheckpointConsumer {
    /// Start consuming on a new task.
    ///
    /// `scheduler` paces reconnects and should not be the one used for
    /// publish retries.
    pub fn spawn(
        transport: Arc<dyn ProducerTransport>,
        scheduler: BackoffScheduler,
        config: CheckpointConfig,
    ) -> CheckpointHandle {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (latest_tx, latest_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let consumer = Self {
            transport,
            scheduler,
            config,
            tracker: PositionTracker::new(),
            events: events_tx,
            latest: latest_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(consumer.run());

        CheckpointHandle {
            events: events_rx,
            latest: latest_rx,
            cancel,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            let (received, reason) = match self.session().await {
                SessionEnd::Stopped => break,
                SessionEnd::Fatal(err) => {
                    warn!(error = %err, "Checkpoint stream failed");
                    self.deliver(Err(err)).await;
                    break;
                }
                SessionEnd::Interrupted { received, reason } => (received, reason),
            };

            if received {
                failures = 0;
            }
            failures = failures.saturating_add(1);

            if let Some(max) = self.config.max_reconnect_attempts {
                if failures > max {
                    warn!(attempts = failures, reason = %reason, "Giving up on checkpoint stream");
                    self.deliver(Err(ShipperError::Exhausted {
                        offset: 0,
                        attempts: failures,
                        last_error: reason,
                    }))
                    .await;
                    break;
                }
            }

            let delay = self.scheduler.next_delay(failures);
            info!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Checkpoint stream interrupted, reconnecting"
            );
            if !self
                .deliver(Ok(CheckpointEvent::Reconnecting {
                    attempt: failures,
                    delay,
                }))
                .await
            {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("Checkpoint consumer stopped");
    }

    /// Open one stream and drain it until it ends.
    async fn session(&mut self) -> SessionEnd {
        let request = PersistedIndexRequest {
            polling_interval_ms: self.config.polling_interval.as_millis() as u64,
        };

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return SessionEnd::Stopped,
            opened = self.transport.persisted_index(request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) if err.is_retryable() => {
                return SessionEnd::Interrupted {
                    received: false,
                    reason: err.to_string(),
                }
            }
            Err(err) => return SessionEnd::Fatal(err),
        };

        let mut received = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Stopped,
                next = stream.next() => next,
            };

            let reply = match next {
                Some(Ok(reply)) => reply,
                Some(Err(err)) if err.is_retryable() => {
                    return SessionEnd::Interrupted {
                        received,
                        reason: err.to_string(),
                    }
                }
                Some(Err(err)) => return SessionEnd::Fatal(err),
                None => {
                    return SessionEnd::Interrupted {
                        received,
                        reason: "stream closed by shipper".to_string(),
                    }
                }
            };
            received = true;

            let event = match self.tracker.observe(&reply) {
                Ok(event) => event,
                Err(err) => return SessionEnd::Fatal(err),
            };
            if let CheckpointEvent::EndpointRestarted { previous, current } = &event {
                info!(
                    previous = %previous.endpoint_id,
                    current = %current.endpoint_id,
                    "Shipper restarted"
                );
            }
            self.latest.send_replace(self.tracker.current());

            if !self.deliver(Ok(event)).await {
                return SessionEnd::Stopped;
            }
        }
    }

    /// Hand one item to the caller. False once nobody will see it.
    async fn deliver(&self, item: ShipperResult<CheckpointEvent>) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(item) => sent.is_ok(),
        }
    }
}

/// Caller side of a running [`CheckpointConsumer`].
///
/// Dropping the handle cancels the consumer.
pub struct CheckpointHandle {
    events: mpsc::Receiver<ShipperResult<CheckpointEvent>>,
    latest: watch::Receiver<Option<PersistedPosition>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CheckpointHandle {
    /// Next event, in the order observed. `None` once the consumer stopped.
    ///
    /// An `Err` is always the last item.
    pub async fn recv(&mut self) -> Option<ShipperResult<CheckpointEvent>> {
        self.events.recv().await
    }

    /// Most recent position, if any.
    pub fn latest(&self) -> Option<PersistedPosition> {
        *self.latest.borrow()
    }

    /// Watch the most recent position without consuming events.
    pub fn subscribe_latest(&self) -> watch::Receiver<Option<PersistedPosition>> {
        self.latest.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the consumer and wait for it to exit.
    ///
    /// The stream is closed before this returns, and events still buffered
    /// are discarded: `recv` yields `None` afterwards.
    pub async fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Checkpoint consumer task failed");
            }
        }
        self.events.close();
        while self.events.try_recv().is_ok() {}
    }
}

impl Drop for CheckpointHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
