//! Frame types for the Roomcast protocol.
//!
//! Frames are the unit of communication between a client and the server,
//! serialized as JSON text over the WebSocket. Client-originated frames
//! carry a request id so the server can acknowledge or reject them
//! individually; server pushes (`event`) carry none.

use chrono::{DateTime, Utc};
use roomcast_core::events::MessageEvent;
use roomcast_core::{Envelope, MessageId, MessageType, RoomId, Topic, UserStatus};
use serde::{Deserialize, Serialize};

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Subscribe to a topic.
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// Request id for acknowledgment.
        id: u64,
        /// Topic to subscribe to.
        topic: Topic,
    },

    /// Unsubscribe from a topic.
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        /// Request id for acknowledgment.
        id: u64,
        /// Topic to unsubscribe from.
        topic: Topic,
    },

    /// Send a message to a room.
    #[serde(rename_all = "camelCase")]
    Send {
        /// Request id for acknowledgment.
        id: u64,
        /// Target room.
        room_id: RoomId,
        /// Message content.
        content: String,
        /// Message kind; defaults to CHAT.
        #[serde(default = "default_message_type")]
        message_type: MessageType,
    },

    /// Edit a previously sent message.
    #[serde(rename_all = "camelCase")]
    Edit {
        /// Request id for acknowledgment.
        id: u64,
        /// Message to edit.
        message_id: MessageId,
        /// Replacement content.
        content: String,
    },

    /// Delete a previously sent message.
    #[serde(rename_all = "camelCase")]
    Delete {
        /// Request id for acknowledgment.
        id: u64,
        /// Message to delete.
        message_id: MessageId,
    },

    /// Typing indicator. Fire-and-forget, never acknowledged.
    #[serde(rename_all = "camelCase")]
    Typing {
        /// Room the indicator applies to.
        room_id: RoomId,
        /// Whether the sender is typing.
        is_typing: bool,
    },

    /// Explicit availability status change (AWAY, BUSY, ONLINE).
    #[serde(rename_all = "camelCase")]
    Status {
        /// Request id for acknowledgment.
        id: u64,
        /// The requested status.
        status: UserStatus,
    },

    /// Request the most recent messages of a room for replay.
    #[serde(rename_all = "camelCase")]
    Recent {
        /// Request id; the `history` response echoes it.
        id: u64,
        /// Room to replay.
        room_id: RoomId,
        /// Maximum number of messages; the server caps this.
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp echoed back in the pong.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Connection established. First frame the server sends.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Server protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
        /// The authenticated user id.
        user_id: i64,
    },

    /// Acknowledgment of a request.
    Ack {
        /// Id of the acknowledged request.
        id: u64,
    },

    /// Error response.
    Error {
        /// Id of the failed request (0 if not tied to a request).
        id: u64,
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// A routed event pushed to a subscriber.
    #[serde(rename_all = "camelCase")]
    Event {
        /// The topic the event was published on.
        topic: Topic,
        /// The event payload; its shape is determined by the topic.
        payload: serde_json::Value,
        /// Publish time.
        published_at: DateTime<Utc>,
    },

    /// Replay response to a `recent` request, oldest first.
    #[serde(rename_all = "camelCase")]
    History {
        /// Id of the `recent` request this answers.
        id: u64,
        /// Room the messages belong to.
        room_id: RoomId,
        /// Messages in chronological order.
        messages: Vec<MessageEvent>,
    },
}

fn default_message_type() -> MessageType {
    MessageType::Chat
}

impl Frame {
    /// Create a Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, topic: Topic) -> Self {
        Frame::Subscribe { id, topic }
    }

    /// Create an Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, topic: Topic) -> Self {
        Frame::Unsubscribe { id, topic }
    }

    /// Create a Send frame with the default CHAT kind.
    #[must_use]
    pub fn send(id: u64, room_id: RoomId, content: impl Into<String>) -> Self {
        Frame::Send {
            id,
            room_id,
            content: content.into(),
            message_type: MessageType::Chat,
        }
    }

    /// Create an Edit frame.
    #[must_use]
    pub fn edit(id: u64, message_id: MessageId, content: impl Into<String>) -> Self {
        Frame::Edit {
            id,
            message_id,
            content: content.into(),
        }
    }

    /// Create a Delete frame.
    #[must_use]
    pub fn delete(id: u64, message_id: MessageId) -> Self {
        Frame::Delete { id, message_id }
    }

    /// Create an Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a Pong frame echoing a ping timestamp.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(
        connection_id: impl Into<String>,
        version: u8,
        heartbeat: u32,
        user_id: i64,
    ) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
            user_id,
        }
    }

    /// Create an Event frame from a routed envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn event(envelope: &Envelope) -> Result<Self, serde_json::Error> {
        Ok(Frame::Event {
            topic: envelope.topic,
            payload: serde_json::to_value(&envelope.event)?,
            published_at: envelope.published_at,
        })
    }

    /// Create a History frame.
    #[must_use]
    pub fn history(id: u64, room_id: RoomId, messages: Vec<MessageEvent>) -> Self {
        Frame::History {
            id,
            room_id,
            messages,
        }
    }

    /// Whether the frame is a client request carrying an id to
    /// acknowledge.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Frame::Subscribe { id, .. }
            | Frame::Unsubscribe { id, .. }
            | Frame::Send { id, .. }
            | Frame::Edit { id, .. }
            | Frame::Delete { id, .. }
            | Frame::Status { id, .. }
            | Frame::Recent { id, .. } => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_wire_shape() {
        let frame = Frame::send(7, 3, "hello");
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "send");
        assert_eq!(json["roomId"], 3);
        assert_eq!(json["messageType"], "CHAT");
    }

    #[test]
    fn test_send_defaults_to_chat() {
        let frame: Frame =
            serde_json::from_str(r#"{"type":"send","id":1,"roomId":2,"content":"hi"}"#).unwrap();
        assert!(matches!(
            frame,
            Frame::Send {
                message_type: MessageType::Chat,
                ..
            }
        ));
    }

    #[test]
    fn test_subscribe_topic_string() {
        let frame: Frame =
            serde_json::from_str(r#"{"type":"subscribe","id":4,"topic":"room:9:typing"}"#).unwrap();
        assert_eq!(frame, Frame::subscribe(4, Topic::Typing(9)));

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["topic"], "room:9:typing");
    }

    #[test]
    fn test_connected_advertises_protocol_version() {
        let frame = Frame::connected("conn-1", crate::PROTOCOL_VERSION, 30_000, 7);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["userId"], 7);
    }

    #[test]
    fn test_request_ids() {
        assert_eq!(Frame::send(5, 1, "x").request_id(), Some(5));
        assert_eq!(Frame::ping().request_id(), None);
        assert_eq!(
            Frame::Typing {
                room_id: 1,
                is_typing: true
            }
            .request_id(),
            None
        );
    }
}
