//! Property tests for the wire codec.

use chrono::{TimeZone, Utc};
use eventrelay_proto::{ChatMessage, InboundMessage, ProtocolError, RoomId, UserId};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: decoding arbitrary client input never panics and only fails
    /// with a protocol error
    #[test]
    fn prop_decode_arbitrary_input(raw in any::<String>()) {
        match InboundMessage::decode(&raw) {
            Ok(_) | Err(ProtocolError::Malformed(_) | ProtocolError::FrameTooLarge { .. }) => {},
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    /// Property: whatever timestamp a client claims, the decoded message
    /// carries the same author and body
    #[test]
    fn prop_client_timestamp_is_ignored(
        user in "[a-zA-Z0-9]{1,28}",
        content in any::<String>(),
        claimed in any::<i64>(),
    ) {
        let raw = serde_json::json!({
            "userID": user,
            "username": "n",
            "content": content,
            "timestamp": claimed,
        })
        .to_string();

        let msg = InboundMessage::decode(&raw)?;
        prop_assert_eq!(msg.user_id, UserId::new(user));
        prop_assert_eq!(msg.content, content);
    }

    /// Property: outbound frames carry author, name, body, and time losslessly
    #[test]
    fn prop_wire_frame_preserves_fields(
        user in any::<String>(),
        username in any::<String>(),
        content in any::<String>(),
        secs in 0i64..4_102_444_800,
        nanos in 0u32..1_000_000_000,
    ) {
        let room = RoomId::parse("room1")?;
        let msg = ChatMessage {
            user_id: UserId::new(user),
            username,
            content,
            timestamp: Utc.timestamp_opt(secs, nanos).unwrap(),
            room_id: room.clone(),
        };

        let json = msg.encode_wire()?;
        let decoded = ChatMessage::decode_wire(&json, room)?;
        prop_assert_eq!(decoded, msg);
    }
}
