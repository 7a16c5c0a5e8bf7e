//! Message lifecycle service.
//!
//! State machine per message: `nonexistent → sent → [edited]* → deleted`.
//! Every mutation is persisted through the store before it is published;
//! publish is the last step, so a stored message is always
//! broadcast-eligible.

use crate::error::ChatError;
use crate::events::{Envelope, MessageEvent, TypingEvent};
use crate::model::{
    Message, MessageId, MessageType, NewMessage, RoomId, User, UserId, MAX_MESSAGE_LENGTH,
};
use crate::rooms::RoomService;
use crate::router::Router;
use crate::store::RoomStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Default page size for message history.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Send/edit/delete/replay operations over room messages.
pub struct MessageService {
    store: Arc<dyn RoomStore>,
    rooms: Arc<RoomService>,
    router: Arc<Router>,
}

impl MessageService {
    /// Create the service.
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, rooms: Arc<RoomService>, router: Arc<Router>) -> Self {
        Self {
            store,
            rooms,
            router,
        }
    }

    async fn load_message(&self, id: MessageId) -> Result<Message, ChatError> {
        self.store
            .find_message_by_id(id)
            .await?
            .ok_or_else(|| ChatError::not_found("message", id))
    }

    async fn load_user(&self, id: UserId) -> Result<User, ChatError> {
        self.store
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| ChatError::not_found("user", id))
    }

    async fn require_participant(&self, room_id: RoomId, user_id: UserId) -> Result<(), ChatError> {
        if self.rooms.is_participant(room_id, user_id).await? {
            Ok(())
        } else {
            Err(ChatError::NotParticipant { user_id, room_id })
        }
    }

    fn validate_content(content: &str) -> Result<(), ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidOperation("message content cannot be empty"));
        }
        if content.len() > MAX_MESSAGE_LENGTH {
            return Err(ChatError::InvalidOperation("message content too long"));
        }
        Ok(())
    }

    /// Gate for edit/delete: only the author of a CHAT message may
    /// mutate it; system-authored kinds are immutable.
    fn require_author_of_chat(message: &Message, requester_id: UserId) -> Result<(), ChatError> {
        if message.sender_id != requester_id {
            return Err(ChatError::Unauthorized("only the author may modify a message"));
        }
        if message.message_type != MessageType::Chat {
            return Err(ChatError::InvalidOperation(
                "system-authored messages are immutable",
            ));
        }
        Ok(())
    }

    /// Send a message to a room. Requires participancy; persists first,
    /// publishes on `room:<id>` last.
    pub async fn send(
        &self,
        sender_id: UserId,
        room_id: RoomId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message, ChatError> {
        if !message_type.is_client_sendable() {
            return Err(ChatError::InvalidOperation(
                "system-authored message types cannot be sent",
            ));
        }
        Self::validate_content(content)?;
        self.require_participant(room_id, sender_id).await?;
        let sender = self.load_user(sender_id).await?;

        let message = self
            .store
            .insert_message(NewMessage {
                room_id,
                sender_id,
                content: content.to_string(),
                message_type,
            })
            .await?;

        info!(message_id = message.id, room_id, sender_id, "message sent");
        self.router
            .publish(Envelope::message(MessageEvent::from_message(&message, &sender)));
        Ok(message)
    }

    /// Edit a message. Author-only, CHAT-only. Publishes the full
    /// updated envelope on `room:<id>:edited` exactly once.
    pub async fn edit(
        &self,
        message_id: MessageId,
        requester_id: UserId,
        new_content: &str,
    ) -> Result<Message, ChatError> {
        Self::validate_content(new_content)?;
        let mut message = self.load_message(message_id).await?;
        Self::require_author_of_chat(&message, requester_id)?;

        message.content = new_content.to_string();
        message.is_edited = true;
        message.edited_at = Some(Utc::now());
        let message = self.store.update_message(message).await?;

        let sender = self.load_user(message.sender_id).await?;
        info!(message_id, requester = requester_id, "message edited");
        self.router
            .publish(Envelope::edited(MessageEvent::from_message(&message, &sender)));
        Ok(message)
    }

    /// Hard-delete a message. Author-only, CHAT-only. Publishes the id
    /// on `room:<id>:deleted`.
    pub async fn delete(&self, message_id: MessageId, requester_id: UserId) -> Result<(), ChatError> {
        let message = self.load_message(message_id).await?;
        Self::require_author_of_chat(&message, requester_id)?;

        self.store.delete_message(message_id).await?;
        info!(message_id, requester = requester_id, "message deleted");
        self.router
            .publish(Envelope::deleted(message.room_id, message_id));
        Ok(())
    }

    /// Fetch a single message, gated on room participancy.
    pub async fn get(&self, message_id: MessageId, requester_id: UserId) -> Result<Message, ChatError> {
        let message = self.load_message(message_id).await?;
        self.require_participant(message.room_id, requester_id).await?;
        Ok(message)
    }

    /// A page of room history, newest first.
    pub async fn list(
        &self,
        room_id: RoomId,
        requester_id: UserId,
        page: u32,
        size: u32,
    ) -> Result<Vec<Message>, ChatError> {
        self.require_participant(room_id, requester_id).await?;
        let size = if size == 0 { DEFAULT_PAGE_SIZE } else { size };
        Ok(self.store.find_messages_by_room(room_id, page, size).await?)
    }

    /// The `limit` most recent messages, returned oldest-first so a
    /// joining client replays them in chronological order.
    pub async fn recent(
        &self,
        room_id: RoomId,
        requester_id: UserId,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError> {
        self.require_participant(room_id, requester_id).await?;
        let mut messages = self.store.find_recent_messages(room_id, limit).await?;
        messages.reverse();
        Ok(messages)
    }

    /// Case-insensitive substring search over room content.
    pub async fn search(
        &self,
        room_id: RoomId,
        requester_id: UserId,
        term: &str,
    ) -> Result<Vec<Message>, ChatError> {
        self.require_participant(room_id, requester_id).await?;
        Ok(self.store.search_messages(room_id, term).await?)
    }

    /// Number of messages in a room.
    pub async fn count(&self, room_id: RoomId, requester_id: UserId) -> Result<u64, ChatError> {
        self.require_participant(room_id, requester_id).await?;
        Ok(self.store.count_messages(room_id).await?)
    }

    /// Publish a transient typing indicator on `room:<id>:typing`.
    /// Nothing is persisted.
    pub async fn typing(
        &self,
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        self.require_participant(room_id, user_id).await?;
        let user = self.load_user(user_id).await?;
        debug!(room_id, user_id, is_typing, "typing indicator");
        self.router.publish(Envelope::typing(TypingEvent {
            room_id,
            user_id,
            username: user.username,
            is_typing,
        }));
        Ok(())
    }
}
