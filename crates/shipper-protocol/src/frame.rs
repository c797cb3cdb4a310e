//! Length-prefixed framing.
//!
//! All integers are little-endian. The length prefix counts everything after
//! itself (header plus body).

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{
    ErrorReply, PersistedIndexReply, PersistedIndexRequest, PublishReply, PublishRequest,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Largest frame accepted from a peer (length prefix value).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const FRAME_TYPE_PUBLISH_REQUEST: u8 = 0x01;
const FRAME_TYPE_PUBLISH_REPLY: u8 = 0x02;
const FRAME_TYPE_PERSISTED_INDEX_REQUEST: u8 = 0x03;
const FRAME_TYPE_PERSISTED_INDEX_REPLY: u8 = 0x04;
const FRAME_TYPE_ERROR: u8 = 0x05;

/// Kind of message carried in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    PublishRequest,
    PublishReply,
    PersistedIndexRequest,
    PersistedIndexReply,
    Error,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> ProtocolResult<Self> {
        match byte {
            FRAME_TYPE_PUBLISH_REQUEST => Ok(FrameType::PublishRequest),
            FRAME_TYPE_PUBLISH_REPLY => Ok(FrameType::PublishReply),
            FRAME_TYPE_PERSISTED_INDEX_REQUEST => Ok(FrameType::PersistedIndexRequest),
            FRAME_TYPE_PERSISTED_INDEX_REPLY => Ok(FrameType::PersistedIndexReply),
            FRAME_TYPE_ERROR => Ok(FrameType::Error),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            FrameType::PublishRequest => FRAME_TYPE_PUBLISH_REQUEST,
            FrameType::PublishReply => FRAME_TYPE_PUBLISH_REPLY,
            FrameType::PersistedIndexRequest => FRAME_TYPE_PERSISTED_INDEX_REQUEST,
            FrameType::PersistedIndexReply => FRAME_TYPE_PERSISTED_INDEX_REPLY,
            FrameType::Error => FRAME_TYPE_ERROR,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameType::PublishRequest => "PublishRequest",
            FrameType::PublishReply => "PublishReply",
            FrameType::PersistedIndexRequest => "PersistedIndexRequest",
            FrameType::PersistedIndexReply => "PersistedIndexReply",
            FrameType::Error => "ErrorReply",
        }
    }
}

/// A message type that travels in its own frame type.
pub trait WireMessage: Serialize + DeserializeOwned {
    const FRAME_TYPE: FrameType;
}

impl WireMessage for PublishRequest {
    const FRAME_TYPE: FrameType = FrameType::PublishRequest;
}

impl WireMessage for PublishReply {
    const FRAME_TYPE: FrameType = FrameType::PublishReply;
}

impl WireMessage for PersistedIndexRequest {
    const FRAME_TYPE: FrameType = FrameType::PersistedIndexRequest;
}

impl WireMessage for PersistedIndexReply {
    const FRAME_TYPE: FrameType = FrameType::PersistedIndexReply;
}

impl WireMessage for ErrorReply {
    const FRAME_TYPE: FrameType = FrameType::Error;
}

/// A decoded frame with its body still serialized.
///
/// Wire format:
/// ```text
/// [4: total_len][1: type][1: flags][2: reserved][16: correlation_id][N: body]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    /// Flags (reserved for future use).
    pub flags: u8,
    /// Ties a reply to the request that caused it.
    pub correlation_id: Uuid,
    pub body: Vec<u8>,
}

impl Frame {
    /// Header size in bytes (type + flags + reserved + correlation_id).
    pub const HEADER_SIZE: usize = 1 + 1 + 2 + 16;

    /// Serialize a message into a frame of the matching type.
    ///
    /// Fails with `FrameTooLarge` if the frame would exceed
    /// [`MAX_FRAME_LEN`], which no peer accepts.
    pub fn from_message<M: WireMessage>(correlation_id: Uuid, message: &M) -> ProtocolResult<Self> {
        let body = serde_json::to_vec(message)?;
        let total_len = Self::HEADER_SIZE + body.len();
        if total_len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(total_len));
        }

        Ok(Self {
            frame_type: M::FRAME_TYPE,
            flags: 0,
            correlation_id,
            body,
        })
    }

    /// Deserialize the body as `M`, checking the frame type first.
    pub fn to_message<M: WireMessage>(&self) -> ProtocolResult<M> {
        if self.frame_type != M::FRAME_TYPE {
            return Err(ProtocolError::UnexpectedFrameType {
                expected: M::FRAME_TYPE.name(),
                got: self.frame_type.name(),
            });
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Encode the frame to bytes (including length prefix).
    ///
    /// Frames built by hand must respect [`MAX_FRAME_LEN`]; the length
    /// prefix is 32 bits.
    pub fn encode(&self) -> Vec<u8> {
        let total_len = Self::HEADER_SIZE + self.body.len();
        let mut buf = Vec::with_capacity(4 + total_len);

        buf.extend_from_slice(&(total_len as u32).to_le_bytes());
        buf.push(self.frame_type.to_byte());
        buf.push(self.flags);
        buf.extend_from_slice(&[0u8, 0u8]);
        buf.extend_from_slice(self.correlation_id.as_bytes());
        buf.extend_from_slice(&self.body);

        buf
    }

    /// Decode a frame from bytes (excluding length prefix).
    pub fn decode(data: &[u8]) -> ProtocolResult<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                got: data.len(),
                need: Self::HEADER_SIZE,
            });
        }

        let frame_type = FrameType::from_byte(data[0])?;
        let flags = data[1];

        // Reserved bytes at [2..4] are ignored

        let mut id = [0u8; 16];
        id.copy_from_slice(&data[4..20]);

        Ok(Self {
            frame_type,
            flags,
            correlation_id: Uuid::from_bytes(id),
            body: data[Self::HEADER_SIZE..].to_vec(),
        })
    }
}

/// Read a length-prefixed frame from a buffer.
///
/// Returns `None` if there isn't enough data for a complete frame, otherwise
/// the frame data (excluding length prefix) and the total bytes consumed.
pub fn read_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    if buf.len() < 4 {
        return None;
    }

    let len = u32::from_le_bytes(buf[0..4].try_into().ok()?) as usize;

    if buf.len() < 4 + len {
        return None;
    }

    Some((&buf[4..4 + len], 4 + len))
}

/// Accumulates bytes read from a socket and splits them into frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> ProtocolResult<Option<Frame>> {
        if self.buf.len() >= 4 {
            let declared = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if declared as usize > MAX_FRAME_LEN {
                return Err(ProtocolError::FrameTooLarge(declared as usize));
            }
        }

        let Some((data, consumed)) = read_frame(&self.buf) else {
            return Ok(None);
        };
        let frame = Frame::decode(data);
        self.buf.drain(..consumed);
        frame.map(Some)
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
