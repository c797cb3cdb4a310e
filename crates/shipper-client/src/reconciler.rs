//! Partial-accept reconciliation.
//!
//! The shipper may accept only a prefix of a batch. The reconciler keeps
//! resending the unacknowledged remainder until the whole batch is accepted,
//! the retry budget runs out, the shipper violates the protocol, or the
//! caller cancels.
//!
//! ```text
//! Pending(0) ──accept k, 0<k<rest──▶ Pending(k)        (no delay)
//!     │  ▲
//!     │  └──accept 0 / transport error──(backoff)──┘
//!     ├──accept everything left──▶ Complete
//!     └──protocol error / budget spent / cancel──▶ Failed
//! ```
//!
//! An accepted prefix is never sent again.

use crate::backoff::BackoffScheduler;
use crate::error::{ShipperError, ShipperResult};
use crate::exchange::{PublishExchange, PublishOutcome};
use crate::transport::ProducerTransport;
use serde::{Deserialize, Serialize};
use shipper_protocol::{EndpointId, Event};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry budget for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after consecutive stalls (zero accepted or a
    /// transport error). Progress resets the count.
    pub max_retries: Option<u32>,
    /// Wall-clock budget for the whole batch, in milliseconds.
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(10),
            max_elapsed_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Retry until cancelled.
    pub fn unbounded() -> Self {
        Self {
            max_retries: None,
            max_elapsed_ms: None,
        }
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_ms.map(Duration::from_millis)
    }
}

/// An ordered, immutable batch of events.
///
/// Cloning is cheap; the events are shared, never copied or modified by the
/// reconciler except to build the request for the unacknowledged remainder.
#[derive(Debug, Clone)]
pub struct Batch {
    events: Arc<[Event]>,
}

impl Batch {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: events.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    fn remainder(&self, offset: usize) -> Vec<Event> {
        self.events[offset..].to_vec()
    }
}

impl From<Vec<Event>> for Batch {
    fn from(events: Vec<Event>) -> Self {
        Self::new(events)
    }
}

/// Where a batch stands.
#[derive(Debug)]
pub enum ReconcileState {
    /// The first `offset` events are accepted; the rest are still owed.
    Pending { offset: usize },
    /// Every event was accepted, in submission order.
    Complete,
    Failed(ShipperError),
}

/// Summary of a fully acknowledged batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub batch_len: usize,
    /// Publish exchanges issued, including stalled and failed ones.
    pub exchanges: u32,
    /// Backoff delays waited out.
    pub backoffs: u32,
    /// Shipper instance that accepted the final part of the batch.
    pub endpoint_id: Option<EndpointId>,
    /// Shipper queue index of the last accepted event.
    pub last_accepted_index: Option<u64>,
}

/// Bookkeeping carried across steps of one reconciliation.
struct Progress {
    started: Instant,
    /// Consecutive exchanges without progress. Drives both the backoff
    /// delay and the retry budget.
    stall_count: u32,
    report: ReconcileReport,
}

/// Drives publish exchanges until a batch is fully accepted.
///
/// Cheap to clone. Clones share the transport and the scheduler's random
/// source, so independent batches can be reconciled concurrently.
#[derive(Clone)]
pub struct Reconciler {
    exchange: PublishExchange,
    scheduler: BackoffScheduler,
    policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        transport: Arc<dyn ProducerTransport>,
        scheduler: BackoffScheduler,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            exchange: PublishExchange::new(transport),
            scheduler,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Publish `events` as one batch.
    pub async fn publish(
        &self,
        events: Vec<Event>,
        cancel: &CancellationToken,
    ) -> ShipperResult<ReconcileReport> {
        self.reconcile(&Batch::new(events), cancel).await
    }

    /// Reconcile `batch` until it is fully accepted.
    ///
    /// On `Ok`, every event of the batch was accepted by the shipper in
    /// submission order. `Exhausted` and `Cancelled` errors carry the offset
    /// already accepted so a caller can resume from there.
    pub async fn reconcile(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> ShipperResult<ReconcileReport> {
        let mut progress = Progress {
            started: Instant::now(),
            stall_count: 0,
            report: ReconcileReport {
                batch_len: batch.len(),
                exchanges: 0,
                backoffs: 0,
                endpoint_id: None,
                last_accepted_index: None,
            },
        };

        let mut state = if batch.is_empty() {
            ReconcileState::Complete
        } else {
            ReconcileState::Pending { offset: 0 }
        };

        loop {
            state = match state {
                ReconcileState::Pending { offset } => {
                    self.step(batch, offset, &mut progress, cancel).await
                }
                ReconcileState::Complete => {
                    info!(
                        batch_len = batch.len(),
                        exchanges = progress.report.exchanges,
                        backoffs = progress.report.backoffs,
                        "Batch fully accepted"
                    );
                    return Ok(progress.report);
                }
                ReconcileState::Failed(err) => {
                    warn!(batch_len = batch.len(), error = %err, "Batch reconciliation failed");
                    return Err(err);
                }
            };
        }
    }

    /// One exchange plus whatever backoff it earns.
    async fn step(
        &self,
        batch: &Batch,
        offset: usize,
        progress: &mut Progress,
        cancel: &CancellationToken,
    ) -> ReconcileState {
        if cancel.is_cancelled() {
            return ReconcileState::Failed(ShipperError::Cancelled { offset });
        }

        let remaining = batch.len() - offset;
        progress.report.exchanges += 1;

        let Some(result) = self.run_exchange(batch.remainder(offset), cancel).await else {
            debug!(offset, "Cancelled while exchange in flight, discarding its result");
            return ReconcileState::Failed(ShipperError::Cancelled { offset });
        };

        let last_error = match result {
            Ok(outcome) => {
                self.note_endpoint(&outcome, progress);
                let accepted = outcome.accepted_count;

                if accepted == remaining {
                    return ReconcileState::Complete;
                }
                if accepted > 0 {
                    debug!(
                        offset,
                        accepted,
                        remaining = remaining - accepted,
                        "Partial accept, sending remainder"
                    );
                    progress.stall_count = 0;
                    return ReconcileState::Pending {
                        offset: offset + accepted,
                    };
                }
                "shipper accepted no events".to_string()
            }
            Err(err) if err.is_retryable() => err.to_string(),
            Err(err) => return ReconcileState::Failed(err),
        };

        progress.stall_count = progress.stall_count.saturating_add(1);

        if let Some(max_retries) = self.policy.max_retries {
            if progress.stall_count > max_retries {
                return ReconcileState::Failed(ShipperError::Exhausted {
                    offset,
                    attempts: progress.report.exchanges,
                    last_error,
                });
            }
        }

        let delay = self.scheduler.next_delay(progress.stall_count);
        if let Some(max_elapsed) = self.policy.max_elapsed() {
            if progress.started.elapsed() + delay > max_elapsed {
                return ReconcileState::Failed(ShipperError::Exhausted {
                    offset,
                    attempts: progress.report.exchanges,
                    last_error,
                });
            }
        }

        debug!(
            offset,
            stall_count = progress.stall_count,
            delay_ms = delay.as_millis() as u64,
            reason = %last_error,
            "No progress, backing off"
        );
        progress.report.backoffs += 1;

        tokio::select! {
            _ = cancel.cancelled() => ReconcileState::Failed(ShipperError::Cancelled { offset }),
            _ = tokio::time::sleep(delay) => ReconcileState::Pending { offset },
        }
    }

    /// Run one exchange on its own task.
    ///
    /// Returns `None` if cancelled first; the task is detached and finishes
    /// on the wire, but its result is dropped.
    async fn run_exchange(
        &self,
        events: Vec<Event>,
        cancel: &CancellationToken,
    ) -> Option<ShipperResult<PublishOutcome>> {
        let exchange = self.exchange.clone();
        let mut task = tokio::spawn(async move { exchange.send(events).await });

        tokio::select! {
            biased;
            joined = &mut task => Some(joined.unwrap_or_else(|e| {
                Err(ShipperError::Transport(format!("publish task failed: {}", e)))
            })),
            _ = cancel.cancelled() => None,
        }
    }

    fn note_endpoint(&self, outcome: &PublishOutcome, progress: &mut Progress) {
        if let Some(previous) = progress.report.endpoint_id {
            if previous != outcome.endpoint_id {
                warn!(
                    previous = %previous,
                    current = %outcome.endpoint_id,
                    "Shipper identity changed mid-batch"
                );
            }
        }
        progress.report.endpoint_id = Some(outcome.endpoint_id);
        if outcome.accepted_count > 0 {
            progress.report.last_accepted_index = Some(outcome.accepted_index);
        }
    }
}
