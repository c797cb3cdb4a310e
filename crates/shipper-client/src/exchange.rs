//! A single publish request/response exchange.

use crate::error::{ShipperError, ShipperResult};
use crate::transport::ProducerTransport;
use shipper_protocol::{EndpointId, Event, PublishRequest};
use std::sync::Arc;
use tracing::trace;

/// Validated result of one exchange.
///
/// The shipper accepted the first `accepted_count` events of the sub-batch
/// that was sent. "Accepted" means admitted to the shipper's responsibility,
/// not persisted; durability is only reported by the checkpoint stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub accepted_count: usize,
    pub endpoint_id: EndpointId,
    pub accepted_index: u64,
    pub persisted_index: u64,
}

/// Sends one batch and checks the reply against it.
///
/// Does not retry and does not interpret partial acceptance.
#[derive(Clone)]
pub struct PublishExchange {
    transport: Arc<dyn ProducerTransport>,
}

impl PublishExchange {
    pub fn new(transport: Arc<dyn ProducerTransport>) -> Self {
        Self { transport }
    }

    /// Perform exactly one exchange.
    pub async fn send(&self, events: Vec<Event>) -> ShipperResult<PublishOutcome> {
        let sent = events.len();
        let reply = self
            .transport
            .publish_events(PublishRequest { events })
            .await?;

        let accepted_count = reply.accepted_count as usize;
        if accepted_count > sent {
            return Err(ShipperError::Protocol(format!(
                "shipper accepted {} events from a batch of {}",
                accepted_count, sent
            )));
        }

        trace!(
            sent,
            accepted = accepted_count,
            endpoint_id = %reply.endpoint_id,
            accepted_index = reply.accepted_index,
            "Publish exchange completed"
        );

        Ok(PublishOutcome {
            accepted_count,
            endpoint_id: reply.endpoint_id,
            accepted_index: reply.accepted_index,
            persisted_index: reply.persisted_index,
        })
    }
}
