//! EventRelay wire protocol.
//!
//! Clients and the server exchange JSON text frames with a single, symmetric
//! shape:
//!
//! ```json
//! { "userID": "u1", "username": "ada", "content": "hi", "timestamp": "2024-05-01T12:00:00Z" }
//! ```
//!
//! Inbound frames are decoded into [`InboundMessage`]. Client-supplied
//! `timestamp` values are ignored and `userID` is advisory: the server checks
//! it against the identity established at connect time and then builds a
//! [`ChatMessage`] with its own timestamp. Outbound frames are produced by
//! [`ChatMessage::encode_wire`].
//!
//! The room a message belongs to never appears on the wire. A connection is
//! bound to exactly one room when it is opened, so the room is implied by the
//! connection the frame travels on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ids;
mod message;

pub use error::ProtocolError;
pub use ids::{MAX_ROOM_ID_LEN, RoomId, UserId};
pub use message::{ChatMessage, InboundMessage, MAX_FRAME_BYTES};
