//! Transport seam between the client logic and the shipper.
//!
//! [`ProducerTransport`] mirrors the shipper's two RPCs and nothing more: it
//! does not retry and does not interpret replies. [`UnixSocketTransport`]
//! speaks the framed protocol over the shipper's local socket.

use crate::error::{ShipperError, ShipperResult};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use shipper_protocol::{
    ErrorReply, Frame, FrameBuffer, FrameType, PersistedIndexReply, PersistedIndexRequest,
    PublishReply, PublishRequest, WireMessage,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

/// Lazy, cancellable sequence of persisted-index updates.
///
/// Ends when the peer closes the stream. Dropping it releases the
/// underlying connection. It cannot be restarted.
pub type PersistedIndexStream = BoxStream<'static, ShipperResult<PersistedIndexReply>>;

/// The shipper's producer RPCs.
#[async_trait]
pub trait ProducerTransport: Send + Sync {
    /// One `PublishEvents` request/response exchange.
    async fn publish_events(&self, request: PublishRequest) -> ShipperResult<PublishReply>;

    /// Open a `PersistedIndex` stream.
    async fn persisted_index(
        &self,
        request: PersistedIndexRequest,
    ) -> ShipperResult<PersistedIndexStream>;
}

/// Transport over the shipper's Unix domain socket.
#[derive(Debug, Clone)]
pub struct UnixSocketTransport {
    socket_path: PathBuf,
    request_timeout: Duration,
}

impl UnixSocketTransport {
    pub fn new(socket_path: impl Into<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            request_timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn connect(&self) -> ShipperResult<FramedConnection> {
        let stream = timeout(self.request_timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| {
                ShipperError::Transport(format!(
                    "timed out connecting to shipper at {}",
                    self.socket_path.display()
                ))
            })?
            .map_err(|e| {
                ShipperError::Transport(format!(
                    "failed to connect to shipper at {}: {}",
                    self.socket_path.display(),
                    e
                ))
            })?;

        debug!(path = %self.socket_path.display(), "Connected to shipper");
        Ok(FramedConnection::new(stream))
    }
}

#[async_trait]
impl ProducerTransport for UnixSocketTransport {
    async fn publish_events(&self, request: PublishRequest) -> ShipperResult<PublishReply> {
        let correlation_id = Uuid::new_v4();
        let frame = Frame::from_message(correlation_id, &request)?;

        let exchange = async {
            let mut conn = self.connect().await?;
            conn.send(&frame).await?;
            let reply = conn
                .recv()
                .await?
                .ok_or_else(|| ShipperError::Transport("shipper closed connection".to_string()))?;
            decode_reply::<PublishReply>(&reply, correlation_id)
        };

        timeout(self.request_timeout, exchange).await.map_err(|_| {
            ShipperError::Transport(format!(
                "publish timed out after {}ms",
                self.request_timeout.as_millis()
            ))
        })?
    }

    async fn persisted_index(
        &self,
        request: PersistedIndexRequest,
    ) -> ShipperResult<PersistedIndexStream> {
        let correlation_id = Uuid::new_v4();
        let frame = Frame::from_message(correlation_id, &request)?;

        let mut conn = self.connect().await?;
        timeout(self.request_timeout, conn.send(&frame))
            .await
            .map_err(|_| ShipperError::Transport("persisted index request timed out".to_string()))??;

        debug!(
            polling_interval_ms = request.polling_interval_ms,
            "Opened persisted index stream"
        );

        // Yield replies until EOF, or stop after the first error.
        let updates = stream::unfold(Some(conn), move |state| async move {
            let mut conn = state?;
            let item = match conn.recv().await {
                Ok(Some(frame)) => decode_reply::<PersistedIndexReply>(&frame, correlation_id),
                Ok(None) => return None,
                Err(e) => Err(e),
            };
            let next = if item.is_ok() { Some(conn) } else { None };
            Some((item, next))
        });

        Ok(Box::pin(updates))
    }
}

/// Map a reply frame to `M`, surfacing error replies and stray frames.
fn decode_reply<M: WireMessage>(frame: &Frame, correlation_id: Uuid) -> ShipperResult<M> {
    if frame.correlation_id != correlation_id {
        return Err(ShipperError::Protocol(format!(
            "reply correlation mismatch: expected {}, got {}",
            correlation_id, frame.correlation_id
        )));
    }
    if frame.frame_type == FrameType::Error {
        let reply: ErrorReply = frame.to_message()?;
        return Err(reply.into());
    }
    if frame.frame_type != M::FRAME_TYPE {
        return Err(ShipperError::Protocol(format!(
            "expected {} reply, got {}",
            M::FRAME_TYPE.name(),
            frame.frame_type.name()
        )));
    }
    Ok(frame.to_message()?)
}

/// A socket plus the bytes read from it that have not formed a frame yet.
struct FramedConnection {
    stream: UnixStream,
    frames: FrameBuffer,
}

impl FramedConnection {
    fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            frames: FrameBuffer::new(),
        }
    }

    async fn send(&mut self, frame: &Frame) -> ShipperResult<()> {
        self.stream.write_all(&frame.encode()).await?;
        Ok(())
    }

    /// Next frame, or `None` on a clean close between frames.
    async fn recv(&mut self) -> ShipperResult<Option<Frame>> {
        loop {
            if let Some(frame) = self.frames.next_frame()? {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                if self.frames.buffered() > 0 {
                    return Err(ShipperError::Transport(
                        "shipper closed connection mid-frame".to_string(),
                    ));
                }
                return Ok(None);
            }
            self.frames.extend(&chunk[..n]);
        }
    }
}
