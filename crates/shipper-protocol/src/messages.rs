//! Message types exchanged with the shipper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Identity of one shipper instance lifetime.
///
/// A restarted shipper comes back with a fresh identity, and its index
/// counters are not comparable with the ones reported before the restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub Uuid);

impl EndpointId {
    /// Generate a fresh identity.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for EndpointId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Origin of an event within the producing agent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Source {
    pub input_id: String,
    pub stream_id: String,
}

/// Data stream an event is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStream {
    #[serde(rename = "type")]
    pub kind: String,
    pub dataset: String,
    pub namespace: String,
}

/// A single event record.
///
/// The client treats an event as opaque: it is serialized as-is and never
/// inspected. `metadata` is reserved for the shipper's own annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_stream: Option<DataStream>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            metadata: Map::new(),
            fields,
            source: None,
            data_stream: None,
        }
    }

    pub fn with_source(mut self, input_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        self.source = Some(Source {
            input_id: input_id.into(),
            stream_id: stream_id.into(),
        });
        self
    }

    pub fn with_data_stream(
        mut self,
        kind: impl Into<String>,
        dataset: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        self.data_stream = Some(DataStream {
            kind: kind.into(),
            dataset: dataset.into(),
            namespace: namespace.into(),
        });
        self
    }
}

/// `PublishEvents` request: an ordered batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub events: Vec<Event>,
}

/// `PublishEvents` reply.
///
/// The shipper accepts a prefix of the request: the first `accepted_count`
/// events. `accepted_index` and `persisted_index` are informational
/// positions in the shipper's queue at the time of the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReply {
    pub endpoint_id: EndpointId,
    pub accepted_count: u32,
    #[serde(default)]
    pub accepted_index: u64,
    #[serde(default)]
    pub persisted_index: u64,
}

/// `PersistedIndex` stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedIndexRequest {
    /// How often the shipper should push an update, in milliseconds.
    pub polling_interval_ms: u64,
}

/// One update on the `PersistedIndex` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedIndexReply {
    pub endpoint_id: EndpointId,
    pub persisted_index: u64,
}

/// Status code carried by an error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Shipper temporarily unable to serve the call.
    Unavailable,
    InvalidArgument,
    FailedPrecondition,
    Unimplemented,
    Internal,
}

impl ErrorCode {
    /// Whether the caller may retry the same call later.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorCode::Unavailable)
    }
}

/// Error reply sent in place of a regular reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorReply {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
