//! Narrow interfaces to the external collaborators.
//!
//! The core never talks to a database or a credential provider directly;
//! it consumes these traits. Implementations live outside the core (the
//! in-memory [`crate::memory::MemoryStore`] is the reference backend).

use crate::error::{StoreError, VerifyError};
use crate::model::{
    Message, MessageId, NewMessage, NewRoom, Room, RoomId, User, UserId, UserStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable CRUD for rooms, messages, and user status.
///
/// Every call may suspend on I/O; these are the only suspension points of
/// the room and message services.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Look up a room by id.
    async fn find_room_by_id(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    /// Look up a room by its unique name.
    async fn find_room_by_name(&self, name: &str) -> Result<Option<Room>, StoreError>;

    /// Whether a room with this name exists.
    async fn room_name_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// All rooms the user participates in.
    async fn find_rooms_by_participant(&self, user_id: UserId) -> Result<Vec<Room>, StoreError>;

    /// The private room between two users, if one exists.
    async fn find_private_room(&self, a: UserId, b: UserId) -> Result<Option<Room>, StoreError>;

    /// Insert a new room.
    ///
    /// Must fail with [`StoreError::UniqueViolation`] when the name is
    /// taken; concurrent private-room creation resolves through that
    /// signal.
    async fn insert_room(&self, room: NewRoom) -> Result<Room, StoreError>;

    /// Persist a mutated room (participants or metadata).
    async fn update_room(&self, room: Room) -> Result<Room, StoreError>;

    /// Delete a room and, cascading, all of its messages.
    async fn delete_room(&self, id: RoomId) -> Result<(), StoreError>;

    /// Insert a new message, assigning id and `sent_at`.
    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Persist a mutated message (content/edited fields).
    async fn update_message(&self, message: Message) -> Result<Message, StoreError>;

    /// Look up a message by id.
    async fn find_message_by_id(&self, id: MessageId) -> Result<Option<Message>, StoreError>;

    /// A page of messages for a room, newest first.
    async fn find_messages_by_room(
        &self,
        room_id: RoomId,
        page: u32,
        size: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// The `limit` most recent messages for a room, newest first.
    async fn find_recent_messages(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// The single most recent message of a room.
    async fn find_last_message(&self, room_id: RoomId) -> Result<Option<Message>, StoreError>;

    /// Number of messages in a room.
    async fn count_messages(&self, room_id: RoomId) -> Result<u64, StoreError>;

    /// Case-insensitive substring search over content, room scope.
    async fn search_messages(
        &self,
        room_id: RoomId,
        term: &str,
    ) -> Result<Vec<Message>, StoreError>;

    /// Hard-delete a message.
    async fn delete_message(&self, id: MessageId) -> Result<(), StoreError>;

    /// Look up a user by id.
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Update a user's availability status and, optionally, last-seen.
    async fn update_user_status(
        &self,
        id: UserId,
        status: UserStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}

/// Resolves a bearer credential to a principal identity. Stateless.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a credential, returning the principal's user id.
    async fn verify(&self, credential: &str) -> Result<UserId, VerifyError>;
}
