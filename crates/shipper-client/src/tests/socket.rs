//! V. Framed transport against a live socket.
//!
//! Cases covered:
//! - 22. A publish round trip preserves the events sent
//! - 23. The reconciler resends remainders over the socket
//! - 24. Error replies map to Transport or Protocol by code
//! - 25. Over-acceptance and stray replies are protocol violations
//! - 26. A connection closed without a reply is a transport error
//! - 27. A persisted index stream yields updates then ends
//! - 28. The checkpoint consumer runs over the socket

use super::harness::{seqs, test_events, unavailable, MockShipper, ShipperResponse};
use crate::backoff::{BackoffConfig, BackoffScheduler};
use crate::checkpoint::{CheckpointConfig, CheckpointConsumer, CheckpointEvent};
use crate::error::ShipperError;
use crate::exchange::PublishExchange;
use crate::reconciler::{Reconciler, RetryPolicy};
use crate::transport::{ProducerTransport, UnixSocketTransport};
use futures_util::StreamExt;
use shipper_protocol::{ErrorCode, ErrorReply, PersistedIndexRequest, PublishRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn transport_for(shipper: &MockShipper) -> Arc<UnixSocketTransport> {
    Arc::new(UnixSocketTransport::new(
        shipper.socket_path().clone(),
        Duration::from_secs(5),
    ))
}

fn quick_backoff() -> BackoffScheduler {
    BackoffScheduler::with_seed(
        BackoffConfig {
            base_ms: 1,
            ceiling_ms: 10,
            jitter_factor: 0.0,
        },
        0,
    )
}

/// Case 22: events arrive as sent and the accepted prefix comes back
#[tokio::test]
async fn case_22_publish_round_trip() {
    let shipper = MockShipper::new();
    shipper.queue_response(ShipperResponse::Accept(2));
    let server = shipper.start();

    let events = test_events(3);
    let reply = transport_for(&shipper)
        .publish_events(PublishRequest {
            events: events.clone(),
        })
        .await
        .unwrap();

    assert_eq!(reply.accepted_count, 2);
    assert_eq!(reply.accepted_index, 2);
    assert_eq!(reply.endpoint_id, shipper.endpoint_id());

    let received = shipper.received_requests();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].events, events);

    server.abort();
}

/// Case 23: 2 accepted, a stall, then the rest
#[tokio::test]
async fn case_23_reconcile_over_socket() {
    let shipper = MockShipper::new();
    shipper.queue_response(ShipperResponse::Accept(2));
    shipper.queue_response(ShipperResponse::Accept(0));
    shipper.queue_response(ShipperResponse::Accept(10));
    let server = shipper.start();

    let reconciler = Reconciler::new(transport_for(&shipper), quick_backoff(), RetryPolicy::default());
    let report = reconciler
        .publish(test_events(5), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.exchanges, 3);
    assert_eq!(report.backoffs, 1);

    let sizes: Vec<usize> = shipper
        .received_requests()
        .iter()
        .map(|r| r.events.len())
        .collect();
    assert_eq!(sizes, vec![5, 3, 3]);
    assert_eq!(seqs(&shipper.received_requests()[2].events), vec![2, 3, 4]);

    server.abort();
}

/// Case 24: unavailable is transient, anything else is a rejection
#[tokio::test]
async fn case_24_error_replies_by_code() {
    let shipper = MockShipper::new();
    shipper.queue_response(ShipperResponse::Error(unavailable("queue full")));
    shipper.queue_response(ShipperResponse::Error(ErrorReply::new(
        ErrorCode::InvalidArgument,
        "bad event",
    )));
    let server = shipper.start();

    let exchange = PublishExchange::new(transport_for(&shipper));

    let busy = exchange.send(test_events(1)).await.unwrap_err();
    assert!(matches!(busy, ShipperError::Transport(_)));

    let rejected = exchange.send(test_events(1)).await.unwrap_err();
    assert!(matches!(rejected, ShipperError::Protocol(_)));

    server.abort();
}

/// Case 25: out-of-range counts and mismatched replies are fatal
#[tokio::test]
async fn case_25_protocol_violations_over_socket() {
    let shipper = MockShipper::new();
    shipper.queue_response(ShipperResponse::AcceptRaw(9));
    shipper.queue_response(ShipperResponse::WrongCorrelation);
    let server = shipper.start();

    let exchange = PublishExchange::new(transport_for(&shipper));

    let over = exchange.send(test_events(3)).await.unwrap_err();
    assert!(matches!(over, ShipperError::Protocol(_)));

    let stray = exchange.send(test_events(3)).await.unwrap_err();
    assert!(matches!(stray, ShipperError::Protocol(_)));

    server.abort();
}

/// Case 26: no reply at all is retryable
#[tokio::test]
async fn case_26_closed_connection_is_transport_error() {
    let shipper = MockShipper::new();
    shipper.queue_response(ShipperResponse::Close);
    let server = shipper.start();

    let err = PublishExchange::new(transport_for(&shipper))
        .send(test_events(2))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    server.abort();
}

/// Case 27: every position is streamed, then the stream ends
#[tokio::test]
async fn case_27_persisted_index_stream() {
    let shipper = MockShipper::new();
    shipper.set_positions(vec![1, 2, 3]);
    let server = shipper.start();

    let mut updates = transport_for(&shipper)
        .persisted_index(PersistedIndexRequest {
            polling_interval_ms: 100,
        })
        .await
        .unwrap();

    let mut indices = Vec::new();
    while let Some(update) = updates.next().await {
        let update = update.unwrap();
        assert_eq!(update.endpoint_id, shipper.endpoint_id());
        indices.push(update.persisted_index);
    }
    assert_eq!(indices, vec![1, 2, 3]);

    server.abort();
}

/// Case 28: positions flow through the consumer until cancelled
#[tokio::test]
async fn case_28_checkpoint_consumer_over_socket() {
    let mut shipper = MockShipper::new();
    shipper.set_positions(vec![4, 7]);
    shipper.keep_streams_open();
    let server = shipper.start();

    let mut handle = CheckpointConsumer::spawn(
        transport_for(&shipper),
        quick_backoff(),
        CheckpointConfig::default(),
    );

    match handle.recv().await.unwrap().unwrap() {
        CheckpointEvent::Established(p) => {
            assert_eq!(p.endpoint_id, shipper.endpoint_id());
            assert_eq!(p.index, 4);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        handle.recv().await.unwrap().unwrap(),
        CheckpointEvent::Advanced(p) if p.index == 7
    ));

    handle.cancel().await;
    assert!(handle.recv().await.is_none());

    server.abort();
}
