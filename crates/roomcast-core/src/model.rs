//! Domain records for Roomcast.
//!
//! Rooms and messages reference users by id only; "reverse" views such as
//! rooms-for-user are queries against the store, never in-memory
//! back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// User identifier.
pub type UserId = i64;
/// Room identifier.
pub type RoomId = i64;
/// Message identifier.
pub type MessageId = i64;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 100;
/// Maximum room description / image URL length.
pub const MAX_ROOM_FIELD_LENGTH: usize = 500;
/// Maximum message content length.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Room kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomType {
    /// Conversation between exactly two users.
    Private,
    /// Creator-owned room with one or more participants.
    Group,
}

/// Message kind.
///
/// Only `Chat` messages are editable and deletable by their author; the
/// remaining kinds are authored by the service and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Regular user message.
    Chat,
    /// System narration: a user joined the room.
    Join,
    /// System narration: a user left the room.
    Leave,
    /// Other system narration (room created, ...).
    System,
    /// File attachment message.
    File,
    /// Image attachment message.
    Image,
}

impl MessageType {
    /// Whether clients may author this kind directly.
    #[must_use]
    pub fn is_client_sendable(self) -> bool {
        matches!(self, MessageType::Chat | MessageType::File | MessageType::Image)
    }
}

/// Connectivity / availability status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    /// Connected and available.
    Online,
    /// No live connection.
    Offline,
    /// Connected but idle.
    Away,
    /// Connected, do not disturb.
    Busy,
}

/// A user record, owned by the store and referenced by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique id.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// Optional display name.
    pub display_name: Option<String>,
    /// Optional avatar URL.
    pub avatar_url: Option<String>,
    /// Current availability status.
    pub status: UserStatus,
    /// When the user was last seen online.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Whether the account is enabled.
    pub enabled: bool,
}

impl User {
    /// Create an enabled, offline user.
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            display_name: None,
            avatar_url: None,
            status: UserStatus::Offline,
            last_seen_at: None,
            enabled: true,
        }
    }
}

/// A named channel of message exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Unique id.
    pub id: RoomId,
    /// Globally unique name. Generated for private rooms, user-chosen for
    /// group rooms.
    pub name: String,
    /// Room kind.
    pub room_type: RoomType,
    /// Optional description (group rooms).
    pub description: Option<String>,
    /// Optional image URL (group rooms).
    pub image_url: Option<String>,
    /// Creator, only meaningful for group rooms.
    pub created_by: Option<UserId>,
    /// Participant set, unordered, no duplicates.
    pub participants: HashSet<UserId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Whether `user_id` is a participant of this room.
    #[must_use]
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// Whether `user_id` created this room.
    #[must_use]
    pub fn is_creator(&self, user_id: UserId) -> bool {
        self.created_by == Some(user_id)
    }

    /// Number of participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

/// Fields of a room that have not been persisted yet; the store assigns
/// the id and timestamps.
#[derive(Debug, Clone)]
pub struct NewRoom {
    /// Globally unique name.
    pub name: String,
    /// Room kind.
    pub room_type: RoomType,
    /// Optional description.
    pub description: Option<String>,
    /// Optional image URL.
    pub image_url: Option<String>,
    /// Creator (group rooms only).
    pub created_by: Option<UserId>,
    /// Initial participant set.
    pub participants: HashSet<UserId>,
}

/// A message, owned by its room and attributed to exactly one sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id.
    pub id: MessageId,
    /// Owning room.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Bounded text content.
    pub content: String,
    /// Message kind.
    pub message_type: MessageType,
    /// Creation time, immutable.
    pub sent_at: DateTime<Utc>,
    /// Last edit time, if ever edited.
    pub edited_at: Option<DateTime<Utc>>,
    /// Whether the message has been edited.
    pub is_edited: bool,
}

/// Fields of a message that have not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Owning room.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Bounded text content.
    pub content: String,
    /// Message kind.
    pub message_type: MessageType,
}

/// Deterministic name for the private room between two users,
/// independent of argument order.
#[must_use]
pub fn private_room_name(a: UserId, b: UserId) -> String {
    format!("private_{}_{}", a.min(b), a.max(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_room_name_is_order_independent() {
        assert_eq!(private_room_name(7, 3), "private_3_7");
        assert_eq!(private_room_name(3, 7), "private_3_7");
    }

    #[test]
    fn test_client_sendable_types() {
        assert!(MessageType::Chat.is_client_sendable());
        assert!(MessageType::File.is_client_sendable());
        assert!(MessageType::Image.is_client_sendable());
        assert!(!MessageType::System.is_client_sendable());
        assert!(!MessageType::Join.is_client_sendable());
        assert!(!MessageType::Leave.is_client_sendable());
    }

    #[test]
    fn test_room_type_serde_matches_wire_names() {
        assert_eq!(serde_json::to_string(&RoomType::Private).unwrap(), "\"PRIVATE\"");
        assert_eq!(serde_json::to_string(&MessageType::Chat).unwrap(), "\"CHAT\"");
        assert_eq!(serde_json::to_string(&UserStatus::Online).unwrap(), "\"ONLINE\"");
    }
}
