//! Event envelopes delivered through the broadcast router.
//!
//! One envelope shape per topic, serialized as JSON for the transport
//! layer. Field names mirror the wire contract (camelCase).

use crate::model::{Message, MessageId, MessageType, RoomId, User, UserId, UserStatus};
use crate::topic::Topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// New or edited message, published on `room:<id>` and `room:<id>:edited`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    /// Message id.
    pub id: MessageId,
    /// Owning room.
    pub room_id: RoomId,
    /// Author id.
    pub sender_id: UserId,
    /// Author username at publish time.
    pub sender_username: String,
    /// Author avatar URL at publish time.
    pub sender_avatar_url: Option<String>,
    /// Message content.
    pub content: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Creation time.
    pub sent_at: DateTime<Utc>,
    /// Whether the message has been edited.
    pub is_edited: bool,
}

impl MessageEvent {
    /// Build the wire envelope for a stored message and its sender.
    #[must_use]
    pub fn from_message(message: &Message, sender: &User) -> Self {
        Self {
            id: message.id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            sender_username: sender.username.clone(),
            sender_avatar_url: sender.avatar_url.clone(),
            content: message.content.clone(),
            message_type: message.message_type,
            sent_at: message.sent_at,
            is_edited: message.is_edited,
        }
    }
}

/// Typing indicator, published on `room:<id>:typing`. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    /// Room the indicator applies to.
    pub room_id: RoomId,
    /// The typing (or no longer typing) user.
    pub user_id: UserId,
    /// Username of that user.
    pub username: String,
    /// Whether the user is currently typing.
    pub is_typing: bool,
}

/// Deleted message id, published on `room:<id>:deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedEvent {
    /// The id of the removed message.
    pub message_id: MessageId,
}

/// Presence transition, published on the global `presence` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    /// The user whose status changed.
    pub user_id: UserId,
    /// Username of that user.
    pub username: String,
    /// The new status.
    pub status: UserStatus,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
}

/// Union of everything the router carries.
///
/// Serialized untagged: the topic an event arrives on identifies its
/// shape, matching the one-envelope-per-topic wire contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    /// New message.
    Message(MessageEvent),
    /// Edited message (full updated envelope).
    MessageEdited(MessageEvent),
    /// Deleted message id.
    MessageDeleted(MessageDeletedEvent),
    /// Typing indicator.
    Typing(TypingEvent),
    /// Presence transition.
    Presence(PresenceEvent),
}

/// A routed event: the topic it was published on plus the payload.
///
/// The topic is the source of truth for routing; `MessageDeletedEvent`
/// in particular carries no room id on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Destination topic.
    pub topic: Topic,
    /// The event payload.
    pub event: Event,
    /// Publish time.
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope for an event with an intrinsic topic.
    #[must_use]
    pub fn new(topic: Topic, event: Event) -> Self {
        Self {
            topic,
            event,
            published_at: Utc::now(),
        }
    }

    /// Envelope for a new message.
    #[must_use]
    pub fn message(event: MessageEvent) -> Self {
        let topic = Topic::Room(event.room_id);
        Self::new(topic, Event::Message(event))
    }

    /// Envelope for an edited message.
    #[must_use]
    pub fn edited(event: MessageEvent) -> Self {
        let topic = Topic::Edited(event.room_id);
        Self::new(topic, Event::MessageEdited(event))
    }

    /// Envelope for a deleted message id.
    #[must_use]
    pub fn deleted(room_id: RoomId, message_id: MessageId) -> Self {
        Self::new(
            Topic::Deleted(room_id),
            Event::MessageDeleted(MessageDeletedEvent { message_id }),
        )
    }

    /// Envelope for a typing indicator.
    #[must_use]
    pub fn typing(event: TypingEvent) -> Self {
        let topic = Topic::Typing(event.room_id);
        Self::new(topic, Event::Typing(event))
    }

    /// Envelope for a presence transition.
    #[must_use]
    pub fn presence(event: PresenceEvent) -> Self {
        Self::new(Topic::Presence, Event::Presence(event))
    }
}
