//! Identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Longest accepted room identifier, in bytes.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Stable user identifier issued by the identity provider.
///
/// Comparison is exact (byte-for-byte). The server only ever constructs a
/// `UserId` for a connection from a verified credential; the copy carried by
/// an inbound frame is compared against it, never trusted on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Room (event) identifier partitioning both delivery and the message log.
///
/// Constructed through [`RoomId::parse`], which rejects values that could not
/// have come from a well-behaved client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Validate and wrap a room identifier.
    ///
    /// Rejects empty or whitespace-only values, values longer than
    /// [`MAX_ROOM_ID_LEN`] bytes, and values containing control characters.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if raw.trim().is_empty() {
            return Err(ProtocolError::InvalidRoomId("empty".to_string()));
        }
        if raw.len() > MAX_ROOM_ID_LEN {
            return Err(ProtocolError::InvalidRoomId(format!(
                "{} bytes exceeds {MAX_ROOM_ID_LEN}",
                raw.len()
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(ProtocolError::InvalidRoomId("contains control characters".to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_accepts_typical_values() {
        for raw in ["room1", "event-2024-05-01", "A1b2C3d4E5", "café"] {
            let room = RoomId::parse(raw).unwrap();
            assert_eq!(room.as_str(), raw);
        }
    }

    #[test]
    fn room_id_rejects_empty_and_blank() {
        assert!(matches!(RoomId::parse(""), Err(ProtocolError::InvalidRoomId(_))));
        assert!(matches!(RoomId::parse("   "), Err(ProtocolError::InvalidRoomId(_))));
    }

    #[test]
    fn room_id_rejects_control_characters() {
        assert!(RoomId::parse("room\n1").is_err());
        assert!(RoomId::parse("room\u{0}").is_err());
    }

    #[test]
    fn room_id_length_limit() {
        let at_limit = "r".repeat(MAX_ROOM_ID_LEN);
        assert!(RoomId::parse(&at_limit).is_ok());

        let over = "r".repeat(MAX_ROOM_ID_LEN + 1);
        assert!(RoomId::parse(&over).is_err());
    }

    #[test]
    fn user_id_compares_exactly() {
        assert_eq!(UserId::from("u1"), UserId::new("u1".to_string()));
        assert_ne!(UserId::from("u1"), UserId::from("U1"));
        assert_ne!(UserId::from("u1"), UserId::from("u1 "));
    }
}
