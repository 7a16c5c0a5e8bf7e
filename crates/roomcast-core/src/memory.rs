//! In-memory [`RoomStore`] backend.
//!
//! Reference implementation used by the test suite and the default server
//! wiring. Enforces the same constraints a relational backend would, in
//! particular the unique room-name constraint the private-room creation
//! race depends on.

use crate::error::StoreError;
use crate::model::{
    Message, MessageId, NewMessage, NewRoom, Room, RoomId, User, UserId, UserStatus,
};
use crate::store::RoomStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    rooms: HashMap<RoomId, Room>,
    // BTreeMap keeps messages in insertion (id) order, which is also
    // chronological order because ids are monotonic.
    messages: BTreeMap<MessageId, Message>,
    users: HashMap<UserId, User>,
}

/// In-process store backed by hash tables behind an async lock.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_room_id: AtomicI64,
    next_message_id: AtomicI64,
    next_user_id: AtomicI64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_room_id: AtomicI64::new(1),
            next_message_id: AtomicI64::new(1),
            next_user_id: AtomicI64::new(1),
        }
    }

    /// Insert a user record, assigning its id. User creation itself is
    /// outside the core; tests and the default server wiring seed
    /// accounts through this.
    pub async fn seed_user(&self, username: impl Into<String>) -> User {
        let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
        let user = User::new(id, username);
        let mut tables = self.tables.write().await;
        tables.users.insert(id, user.clone());
        user
    }

    /// Replace a seeded user record (profile edits in tests).
    pub async fn put_user(&self, user: User) {
        let mut tables = self.tables.write().await;
        tables.users.insert(user.id, user);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn find_room_by_id(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.rooms.get(&id).cloned())
    }

    async fn find_room_by_name(&self, name: &str) -> Result<Option<Room>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.rooms.values().find(|r| r.name == name).cloned())
    }

    async fn room_name_exists(&self, name: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.rooms.values().any(|r| r.name == name))
    }

    async fn find_rooms_by_participant(&self, user_id: UserId) -> Result<Vec<Room>, StoreError> {
        let tables = self.tables.read().await;
        let mut rooms: Vec<Room> = tables
            .rooms
            .values()
            .filter(|r| r.has_participant(user_id))
            .cloned()
            .collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn find_private_room(&self, a: UserId, b: UserId) -> Result<Option<Room>, StoreError> {
        let name = crate::model::private_room_name(a, b);
        self.find_room_by_name(&name).await
    }

    async fn insert_room(&self, room: NewRoom) -> Result<Room, StoreError> {
        let mut tables = self.tables.write().await;
        // Uniqueness check and insert under the same write lock, so the
        // constraint holds under concurrent inserts.
        if tables.rooms.values().any(|r| r.name == room.name) {
            return Err(StoreError::UniqueViolation(room.name));
        }

        let id = self.next_room_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let stored = Room {
            id,
            name: room.name,
            room_type: room.room_type,
            description: room.description,
            image_url: room.image_url,
            created_by: room.created_by,
            participants: room.participants,
            created_at: now,
            updated_at: now,
        };
        tables.rooms.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_room(&self, mut room: Room) -> Result<Room, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.rooms.contains_key(&room.id) {
            return Err(StoreError::NotFound);
        }
        if tables
            .rooms
            .values()
            .any(|r| r.id != room.id && r.name == room.name)
        {
            return Err(StoreError::UniqueViolation(room.name));
        }
        room.updated_at = Utc::now();
        tables.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn delete_room(&self, id: RoomId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.rooms.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        tables.messages.retain(|_, m| m.room_id != id);
        Ok(())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let stored = Message {
            id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            sent_at: Utc::now(),
            edited_at: None,
            is_edited: false,
        };
        let mut tables = self.tables.write().await;
        tables.messages.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_message(&self, message: Message) -> Result<Message, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.messages.contains_key(&message.id) {
            return Err(StoreError::NotFound);
        }
        tables.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_message_by_id(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.messages.get(&id).cloned())
    }

    async fn find_messages_by_room(
        &self,
        room_id: RoomId,
        page: u32,
        size: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .values()
            .rev()
            .filter(|m| m.room_id == room_id)
            .skip(page as usize * size as usize)
            .take(size as usize)
            .cloned()
            .collect())
    }

    async fn find_recent_messages(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .values()
            .rev()
            .filter(|m| m.room_id == room_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_last_message(&self, room_id: RoomId) -> Result<Option<Message>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .values()
            .rev()
            .find(|m| m.room_id == room_id)
            .cloned())
    }

    async fn count_messages(&self, room_id: RoomId) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.messages.values().filter(|m| m.room_id == room_id).count() as u64)
    }

    async fn search_messages(
        &self,
        room_id: RoomId,
        term: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let needle = term.to_lowercase();
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .values()
            .filter(|m| m.room_id == room_id && m.content.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.messages.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn update_user_status(
        &self,
        id: UserId,
        status: UserStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.status = status;
        if last_seen.is_some() {
            user.last_seen_at = last_seen;
        }
        Ok(())
    }
}
