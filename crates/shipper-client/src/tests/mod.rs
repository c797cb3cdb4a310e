//! Integration tests for the shipper client.
//!
//! - `harness.rs`       - Scripted transport and mock Unix-socket shipper
//! - `reconcile.rs`     - I. Partial acceptance and resend of the remainder
//! - `cancellation.rs`  - II. Cancellation during backoff and in flight
//! - `concurrency.rs`   - III. Independent batches sharing one endpoint
//! - `checkpoint.rs`    - IV. Checkpoint stream monotonicity and reconnects
//! - `socket.rs`        - V. Framed transport against a live socket

mod concurrency;
mod socket;
