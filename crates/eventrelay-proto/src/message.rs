//! Chat message types and the JSON frame codec.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, RoomId, UserId};

/// Default upper bound for a single inbound frame, in bytes.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// A message as submitted by a client.
///
/// Every field is advisory. `user_id` is compared against the connection's
/// authenticated identity before anything else happens to the message; any
/// `timestamp` the client sends is discarded during decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InboundMessage {
    /// Claimed author
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Display name chosen by the client
    pub username: String,
    /// Message body
    pub content: String,
}

impl InboundMessage {
    /// Decode a client frame using the default [`MAX_FRAME_BYTES`] limit.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        Self::decode_with_limit(raw, MAX_FRAME_BYTES)
    }

    /// Decode a client frame, rejecting frames larger than `max_bytes`.
    ///
    /// The frame must be a JSON object. Missing string fields decode as empty
    /// strings. Unknown fields are ignored.
    pub fn decode_with_limit(raw: &str, max_bytes: usize) -> Result<Self, ProtocolError> {
        if raw.len() > max_bytes {
            return Err(ProtocolError::FrameTooLarge { size: raw.len(), max: max_bytes });
        }

        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ProtocolError::Malformed("frame is not a JSON object".into()));
        }

        Self::deserialize(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// A validated, server-stamped chat message.
///
/// Only the session handler builds these, after checking the claimed author
/// against the authenticated one. Immutable once built; shared between the
/// storage sink and every outbound queue as `Arc<ChatMessage>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Authenticated author
    pub user_id: UserId,
    /// Display name as submitted
    pub username: String,
    /// Message body
    pub content: String,
    /// Server-assigned acceptance time
    pub timestamp: DateTime<Utc>,
    /// Room the message was submitted to
    pub room_id: RoomId,
}

/// Borrowed outbound frame. Field names are part of the wire contract.
#[derive(Serialize)]
struct WireFrameRef<'a> {
    #[serde(rename = "userID")]
    user_id: &'a str,
    username: &'a str,
    content: &'a str,
    timestamp: String,
}

#[derive(Deserialize)]
struct WireFrame {
    #[serde(rename = "userID")]
    user_id: UserId,
    username: String,
    content: String,
    timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Encode as an outbound JSON text frame.
    ///
    /// The timestamp is written in RFC 3339 with a `Z` suffix and as many
    /// fractional digits as needed to be lossless.
    pub fn encode_wire(&self) -> Result<String, ProtocolError> {
        let frame = WireFrameRef {
            user_id: self.user_id.as_str(),
            username: &self.username,
            content: &self.content,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        };

        serde_json::to_string(&frame).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode an outbound frame received on a connection bound to `room_id`.
    pub fn decode_wire(raw: &str, room_id: RoomId) -> Result<Self, ProtocolError> {
        let frame: WireFrame =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        Ok(Self {
            user_id: frame.user_id,
            username: frame.username,
            content: frame.content,
            timestamp: frame.timestamp,
            room_id,
        })
    }
}
