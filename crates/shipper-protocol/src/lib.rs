//! Wire types and framing for the event shipper producer protocol.
//!
//! The shipper exposes two logical RPCs to producers:
//!
//! - `PublishEvents`: unary. A [`PublishRequest`] carries an ordered batch of
//!   [`Event`]s; the [`PublishReply`] reports how many of them, counted from
//!   the front of the batch, the shipper accepted.
//! - `PersistedIndex`: server streaming. One [`PersistedIndexRequest`] opens a
//!   stream of [`PersistedIndexReply`] updates carrying the shipper's durable
//!   position.
//!
//! Messages travel as length-prefixed [`Frame`]s over a local socket:
//!
//! ```text
//! [4: body_len][1: type][1: flags][2: reserved][16: correlation_id][N: JSON body]
//! ```

mod error;
mod frame;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{read_frame, Frame, FrameBuffer, FrameType, WireMessage, MAX_FRAME_LEN};
pub use messages::{
    DataStream, EndpointId, ErrorCode, ErrorReply, Event, PersistedIndexReply,
    PersistedIndexRequest, PublishReply, PublishRequest, Source,
};
