//! III. Independent batches sharing one endpoint.
//!
//! Cases covered:
//! - 11. Concurrent batches each complete intact through one transport
//! - 12. One batch never has two exchanges in flight
//! - 13. Reconcilers sharing a scheduler still make progress independently

use super::harness::{seqs, test_events, ScriptedTransport};
use crate::backoff::{BackoffConfig, BackoffScheduler};
use crate::error::ShipperResult;
use crate::reconciler::{Reconciler, RetryPolicy};
use crate::transport::{PersistedIndexStream, ProducerTransport};
use async_trait::async_trait;
use serde_json::json;
use shipper_protocol::{Event, PersistedIndexRequest, PublishReply, PublishRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn tagged_events(batch: usize, n: usize) -> Vec<Event> {
    test_events(n)
        .into_iter()
        .map(|mut event| {
            event.fields.insert("batch".to_string(), json!(batch));
            event
        })
        .collect()
}

/// Counts exchanges in flight at once.
struct InFlightTransport {
    inner: Arc<ScriptedTransport>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl ProducerTransport for InFlightTransport {
    async fn publish_events(&self, request: PublishRequest) -> ShipperResult<PublishReply> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let reply = self.inner.publish_events(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }

    async fn persisted_index(
        &self,
        request: PersistedIndexRequest,
    ) -> ShipperResult<PersistedIndexStream> {
        self.inner.persisted_index(request).await
    }
}

/// Case 11: eight batches at once, none mixed with another
#[tokio::test]
async fn case_11_concurrent_batches_complete_intact() {
    let transport = Arc::new(ScriptedTransport::new());
    for _ in 0..8 {
        transport.push_accept(3);
    }

    let reconciler = Reconciler::new(
        transport.clone(),
        BackoffScheduler::with_seed(BackoffConfig::default(), 4),
        RetryPolicy::default(),
    );

    let tasks: Vec<_> = (0..8)
        .map(|batch| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                reconciler
                    .publish(tagged_events(batch, 3), &CancellationToken::new())
                    .await
            })
        })
        .collect();

    for task in tasks {
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.exchanges, 1);
    }

    let sent = transport.sent_batches();
    assert_eq!(sent.len(), 8);
    for batch in &sent {
        assert_eq!(seqs(batch), vec![0, 1, 2]);
        let tag = &batch[0].fields["batch"];
        assert!(batch.iter().all(|e| &e.fields["batch"] == tag));
    }
}

/// Case 12: exchanges for one batch are strictly sequential
#[tokio::test(start_paused = true)]
async fn case_12_one_exchange_in_flight_per_batch() {
    let scripted = Arc::new(ScriptedTransport::new());
    for _ in 0..6 {
        scripted.push_delayed_accept(1, Duration::from_millis(10));
    }
    let transport = Arc::new(InFlightTransport {
        inner: scripted.clone(),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });

    let report = Reconciler::new(
        transport.clone(),
        BackoffScheduler::with_seed(BackoffConfig::default(), 4),
        RetryPolicy::default(),
    )
    .publish(test_events(6), &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(report.exchanges, 6);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
}

/// Case 13: a stalled batch does not hold up another one
#[tokio::test(start_paused = true)]
async fn case_13_shared_scheduler_independent_progress() {
    let slow = Arc::new(ScriptedTransport::new());
    for _ in 0..5 {
        slow.push_accept(0);
    }
    slow.push_accept(2);

    let fast = Arc::new(ScriptedTransport::new());
    fast.push_accept(2);

    let scheduler = BackoffScheduler::with_seed(BackoffConfig::default(), 8);
    let slow_reconciler = Reconciler::new(slow.clone(), scheduler.clone(), RetryPolicy::default());
    let fast_reconciler = Reconciler::new(fast.clone(), scheduler, RetryPolicy::default());

    let slow_task = tokio::spawn(async move {
        slow_reconciler
            .publish(test_events(2), &CancellationToken::new())
            .await
    });

    let fast_report = fast_reconciler
        .publish(test_events(2), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fast_report.exchanges, 1);

    let slow_report = slow_task.await.unwrap().unwrap();
    assert_eq!(slow_report.exchanges, 6);
    assert_eq!(slow_report.backoffs, 5);
}
