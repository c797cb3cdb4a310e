//! Shipper client: reliable event publishing to a local shipper.
//!
//! The shipper may accept only a prefix of each batch it receives. This
//! crate hides that from callers: a batch handed to the [`Reconciler`] is
//! either fully accepted, in order and with no accepted event sent twice,
//! or fails with the offset already accepted.
//!
//! # Core Invariants
//!
//! 1. **Prefix acceptance**: acceptance is always the first N events sent
//! 2. **No resend**: an accepted prefix is never sent again
//! 3. **Protocol errors are fatal**: they are never retried
//! 4. **Monotonic checkpoints**: persisted indices never go backwards for
//!    the same shipper instance
//!
//! # Architecture
//!
//! ```text
//! caller -> Reconciler -> PublishExchange -> ProducerTransport -> shipper
//!                |                                                  |
//!         BackoffScheduler                                          |
//! caller <- CheckpointHandle <- CheckpointConsumer <- PersistedIndex-+
//! ```
//!
//! "Accepted" means the shipper took responsibility for an event, not that
//! it is durable. Durability is only learned from the checkpoint stream.

pub mod backoff;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod exchange;
pub mod logging;
pub mod reconciler;
pub mod transport;

#[cfg(test)]
mod tests;

pub use backoff::{BackoffConfig, BackoffScheduler};
pub use checkpoint::{
    CheckpointConfig, CheckpointConsumer, CheckpointEvent, CheckpointHandle, PersistedPosition,
    PositionTracker,
};
pub use config::ShipperConfig;
pub use error::{ShipperError, ShipperResult};
pub use exchange::{PublishExchange, PublishOutcome};
pub use logging::{init_logging, LogConfig};
pub use reconciler::{Batch, ReconcileReport, ReconcileState, Reconciler, RetryPolicy};
pub use transport::{PersistedIndexStream, ProducerTransport, UnixSocketTransport};

pub use shipper_protocol::{EndpointId, Event};
