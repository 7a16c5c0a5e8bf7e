//! Room membership service.
//!
//! Enforces room-type invariants, creator privileges, and the private
//! room dedup rule, and narrates membership changes with system messages
//! published through the router.

use crate::error::{ChatError, StoreError};
use crate::events::{Envelope, MessageEvent};
use crate::model::{
    private_room_name, MessageType, NewMessage, NewRoom, Room, RoomId, RoomType, User, UserId,
    MAX_ROOM_FIELD_LENGTH, MAX_ROOM_NAME_LENGTH,
};
use crate::router::Router;
use crate::store::RoomStore;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Explicit whitelist of updatable room metadata fields. A `None` leaves
/// the field untouched; there is no generic merge.
#[derive(Debug, Clone, Default)]
pub struct RoomUpdate {
    /// New room name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New image URL.
    pub image_url: Option<String>,
}

/// Room membership and lifecycle operations.
///
/// Every operation takes the acting principal explicitly; there is no
/// ambient current-user context.
pub struct RoomService {
    store: Arc<dyn RoomStore>,
    router: Arc<Router>,
    // Serializes participant-set and metadata mutation per room so
    // concurrent requests cannot lose updates.
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl RoomService {
    /// Create the service over a store and a router.
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, router: Arc<Router>) -> Self {
        Self {
            store,
            router,
            room_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, room_id: RoomId) -> Arc<Mutex<()>> {
        self.room_locks
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_room(&self, room_id: RoomId) -> Result<Room, ChatError> {
        self.store
            .find_room_by_id(room_id)
            .await?
            .ok_or_else(|| ChatError::not_found("room", room_id))
    }

    async fn load_user(&self, user_id: UserId) -> Result<User, ChatError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ChatError::not_found("user", user_id))
    }

    fn require_participant(room: &Room, user_id: UserId) -> Result<(), ChatError> {
        if room.has_participant(user_id) {
            Ok(())
        } else {
            Err(ChatError::NotParticipant {
                user_id,
                room_id: room.id,
            })
        }
    }

    fn validate_name(name: &str) -> Result<(), ChatError> {
        if name.trim().is_empty() {
            return Err(ChatError::InvalidOperation("room name cannot be empty"));
        }
        if name.len() > MAX_ROOM_NAME_LENGTH {
            return Err(ChatError::InvalidOperation("room name too long"));
        }
        Ok(())
    }

    /// Persist a system-authored message narrating a room event and
    /// publish it on the room topic. The room's creator is recorded as
    /// the sender, as in every system message.
    async fn system_message(
        &self,
        room: &Room,
        content: String,
        message_type: MessageType,
    ) -> Result<(), ChatError> {
        let author_id = room.created_by.unwrap_or_else(|| {
            // Private rooms never produce system messages; guarded by the
            // GROUP-only checks on every caller.
            warn!(room_id = room.id, "system message in room without creator");
            0
        });
        let author = self.load_user(author_id).await?;
        let message = self
            .store
            .insert_message(NewMessage {
                room_id: room.id,
                sender_id: author_id,
                content,
                message_type,
            })
            .await?;
        self.router
            .publish(Envelope::message(MessageEvent::from_message(&message, &author)));
        Ok(())
    }

    /// Create a group room. The creator is always a participant, even if
    /// absent from `participant_ids`.
    ///
    /// # Errors
    ///
    /// `NameConflict` if the name is taken; `NotFound` if the creator or
    /// any listed participant does not exist.
    pub async fn create_group_room(
        &self,
        creator_id: UserId,
        name: &str,
        description: Option<String>,
        image_url: Option<String>,
        participant_ids: &[UserId],
    ) -> Result<Room, ChatError> {
        Self::validate_name(name)?;
        let creator = self.load_user(creator_id).await?;

        if self.store.room_name_exists(name).await? {
            return Err(ChatError::NameConflict(name.to_string()));
        }

        let mut participants: HashSet<UserId> = HashSet::new();
        participants.insert(creator_id);
        for &user_id in participant_ids {
            // Every listed participant must resolve.
            self.load_user(user_id).await?;
            participants.insert(user_id);
        }

        let room = match self
            .store
            .insert_room(NewRoom {
                name: name.to_string(),
                room_type: RoomType::Group,
                description,
                image_url,
                created_by: Some(creator_id),
                participants,
            })
            .await
        {
            Ok(room) => room,
            Err(StoreError::UniqueViolation(name)) => {
                return Err(ChatError::NameConflict(name))
            }
            Err(e) => return Err(e.into()),
        };

        info!(room_id = room.id, name = %room.name, creator = creator_id, "group room created");
        self.system_message(
            &room,
            format!("{} created the group", creator.username),
            MessageType::System,
        )
        .await?;
        Ok(room)
    }

    /// Return the private room between two users, creating it on first
    /// contact. Idempotent: repeated and concurrent calls converge to
    /// the same room regardless of argument order.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for a self-chat; `NotFound` if either user does
    /// not exist.
    pub async fn get_or_create_private_room(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Room, ChatError> {
        if user_a == user_b {
            return Err(ChatError::InvalidOperation(
                "cannot create a private room with yourself",
            ));
        }
        self.load_user(user_a).await?;
        self.load_user(user_b).await?;

        if let Some(existing) = self.store.find_private_room(user_a, user_b).await? {
            return Ok(existing);
        }

        let insert = self
            .store
            .insert_room(NewRoom {
                name: private_room_name(user_a, user_b),
                room_type: RoomType::Private,
                description: None,
                image_url: None,
                created_by: None,
                participants: [user_a, user_b].into_iter().collect(),
            })
            .await;

        match insert {
            Ok(room) => {
                info!(room_id = room.id, name = %room.name, "private room created");
                Ok(room)
            }
            // Lost the creation race: the winner's row is the room.
            Err(StoreError::UniqueViolation(_)) => self
                .store
                .find_private_room(user_a, user_b)
                .await?
                .ok_or_else(|| ChatError::NameConflict(private_room_name(user_a, user_b))),
            Err(e) => Err(e.into()),
        }
    }

    /// Add a participant to a group room. The requester must already be a
    /// participant. Emits a JOIN system message.
    pub async fn add_participant(
        &self,
        room_id: RoomId,
        requester_id: UserId,
        user_id: UserId,
    ) -> Result<Room, ChatError> {
        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;

        let mut room = self.load_room(room_id).await?;
        if room.room_type == RoomType::Private {
            return Err(ChatError::InvalidOperation(
                "cannot add participants to a private room",
            ));
        }
        Self::require_participant(&room, requester_id)?;

        let joining = self.load_user(user_id).await?;
        if !room.participants.insert(user_id) {
            return Err(ChatError::InvalidOperation(
                "user is already a participant",
            ));
        }

        let room = self.store.update_room(room).await?;
        info!(room_id, user_id, requester = requester_id, "participant added");
        self.system_message(
            &room,
            format!("{} joined the group", joining.username),
            MessageType::Join,
        )
        .await?;
        Ok(room)
    }

    /// Remove a participant from a group room. Allowed for self-leave or
    /// for the room's creator. Emits a LEAVE system message.
    pub async fn remove_participant(
        &self,
        room_id: RoomId,
        requester_id: UserId,
        user_id: UserId,
    ) -> Result<Room, ChatError> {
        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;

        let mut room = self.load_room(room_id).await?;
        if room.room_type == RoomType::Private {
            return Err(ChatError::InvalidOperation(
                "cannot remove participants from a private room",
            ));
        }
        if requester_id != user_id && !room.is_creator(requester_id) {
            return Err(ChatError::Unauthorized(
                "only the creator may remove other participants",
            ));
        }

        let leaving = self.load_user(user_id).await?;
        if !room.participants.remove(&user_id) {
            return Err(ChatError::InvalidOperation(
                "user is not a participant of the room",
            ));
        }

        let room = self.store.update_room(room).await?;
        info!(room_id, user_id, requester = requester_id, "participant removed");
        self.system_message(
            &room,
            format!("{} left the group", leaving.username),
            MessageType::Leave,
        )
        .await?;
        Ok(room)
    }

    /// Leave a room: self-removal.
    pub async fn leave_room(&self, room_id: RoomId, requester_id: UserId) -> Result<Room, ChatError> {
        self.remove_participant(room_id, requester_id, requester_id)
            .await
    }

    /// Update group-room metadata through the explicit field whitelist.
    /// Creator-only.
    pub async fn update_metadata(
        &self,
        room_id: RoomId,
        requester_id: UserId,
        update: RoomUpdate,
    ) -> Result<Room, ChatError> {
        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;

        let mut room = self.load_room(room_id).await?;
        if room.room_type == RoomType::Private {
            return Err(ChatError::InvalidOperation("cannot edit a private room"));
        }
        if !room.is_creator(requester_id) {
            return Err(ChatError::Unauthorized("only the creator may edit the room"));
        }

        if let Some(name) = update.name {
            Self::validate_name(&name)?;
            if name != room.name && self.store.room_name_exists(&name).await? {
                return Err(ChatError::NameConflict(name));
            }
            room.name = name;
        }
        if let Some(description) = update.description {
            if description.len() > MAX_ROOM_FIELD_LENGTH {
                return Err(ChatError::InvalidOperation("description too long"));
            }
            room.description = Some(description);
        }
        if let Some(image_url) = update.image_url {
            if image_url.len() > MAX_ROOM_FIELD_LENGTH {
                return Err(ChatError::InvalidOperation("image URL too long"));
            }
            room.image_url = Some(image_url);
        }

        let room = self.store.update_room(room).await?;
        info!(room_id, requester = requester_id, "room metadata updated");
        Ok(room)
    }

    /// Delete a group room and all of its messages. Creator-only.
    pub async fn delete_room(&self, room_id: RoomId, requester_id: UserId) -> Result<(), ChatError> {
        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;

        let room = self.load_room(room_id).await?;
        if room.room_type == RoomType::Private {
            return Err(ChatError::InvalidOperation("cannot delete a private room"));
        }
        if !room.is_creator(requester_id) {
            return Err(ChatError::Unauthorized("only the creator may delete the room"));
        }

        self.store.delete_room(room_id).await?;
        self.room_locks.remove(&room_id);
        info!(room_id, requester = requester_id, "room deleted");
        Ok(())
    }

    /// Fetch a room, gated on participancy.
    pub async fn get_room(&self, room_id: RoomId, requester_id: UserId) -> Result<Room, ChatError> {
        let room = self.load_room(room_id).await?;
        Self::require_participant(&room, requester_id)?;
        Ok(room)
    }

    /// All rooms the user participates in.
    pub async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<Room>, ChatError> {
        Ok(self.store.find_rooms_by_participant(user_id).await?)
    }

    /// Case-insensitive name search over the requester's own rooms.
    pub async fn search_rooms(
        &self,
        requester_id: UserId,
        query: &str,
    ) -> Result<Vec<Room>, ChatError> {
        let needle = query.to_lowercase();
        let rooms = self.store.find_rooms_by_participant(requester_id).await?;
        Ok(rooms
            .into_iter()
            .filter(|r| r.name.to_lowercase().contains(&needle))
            .collect())
    }

    /// The universal room-access gate.
    pub async fn is_participant(&self, room_id: RoomId, user_id: UserId) -> Result<bool, ChatError> {
        Ok(self.load_room(room_id).await?.has_participant(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::memory::MemoryStore;
    use crate::topic::Topic;

    struct Fixture {
        store: Arc<MemoryStore>,
        router: Arc<Router>,
        rooms: RoomService,
        alice: UserId,
        bob: UserId,
        carol: UserId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let router = Arc::new(Router::new());
        let rooms = RoomService::new(store.clone() as Arc<dyn RoomStore>, Arc::clone(&router));
        let alice = store.seed_user("alice").await.id;
        let bob = store.seed_user("bob").await.id;
        let carol = store.seed_user("carol").await.id;
        Fixture {
            store,
            router,
            rooms,
            alice,
            bob,
            carol,
        }
    }

    #[tokio::test]
    async fn test_create_group_room_includes_creator_and_narrates() {
        let f = fixture().await;
        let room = f
            .rooms
            .create_group_room(f.alice, "team", None, None, &[f.bob])
            .await
            .unwrap();

        assert_eq!(room.room_type, RoomType::Group);
        assert!(room.has_participant(f.alice));
        assert!(room.has_participant(f.bob));
        assert_eq!(room.created_by, Some(f.alice));

        let last = f.store.find_last_message(room.id).await.unwrap().unwrap();
        assert_eq!(last.message_type, MessageType::System);
        assert_eq!(last.content, "alice created the group");
    }

    #[tokio::test]
    async fn test_group_room_name_conflict() {
        let f = fixture().await;
        f.rooms
            .create_group_room(f.alice, "team", None, None, &[])
            .await
            .unwrap();
        let err = f
            .rooms
            .create_group_room(f.bob, "team", None, None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NameConflict(name) if name == "team"));
    }

    #[tokio::test]
    async fn test_private_room_is_deduplicated_and_order_independent() {
        let f = fixture().await;
        let first = f
            .rooms
            .get_or_create_private_room(f.alice, f.bob)
            .await
            .unwrap();
        let second = f
            .rooms
            .get_or_create_private_room(f.bob, f.alice)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.name, private_room_name(f.alice, f.bob));
        assert_eq!(first.participant_count(), 2);
        assert_eq!(first.created_by, None);
    }

    #[tokio::test]
    async fn test_private_room_with_self_rejected() {
        let f = fixture().await;
        let err = f
            .rooms
            .get_or_create_private_room(f.alice, f.alice)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_private_room_invariant_two_participants() {
        let f = fixture().await;
        let room = f
            .rooms
            .get_or_create_private_room(f.alice, f.bob)
            .await
            .unwrap();

        let err = f
            .rooms
            .add_participant(room.id, f.alice, f.carol)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidOperation(_)));

        let err = f
            .rooms
            .remove_participant(room.id, f.alice, f.bob)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidOperation(_)));

        let reread = f.rooms.get_room(room.id, f.alice).await.unwrap();
        assert_eq!(reread.participant_count(), 2);
    }

    #[tokio::test]
    async fn test_add_participant_rules() {
        let f = fixture().await;
        let room = f
            .rooms
            .create_group_room(f.alice, "team", None, None, &[])
            .await
            .unwrap();

        // Outsider cannot add anyone.
        let err = f
            .rooms
            .add_participant(room.id, f.carol, f.bob)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotParticipant { .. }));

        let room = f.rooms.add_participant(room.id, f.alice, f.bob).await.unwrap();
        assert!(room.has_participant(f.bob));

        // Duplicate add.
        let err = f
            .rooms
            .add_participant(room.id, f.alice, f.bob)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidOperation(_)));

        let last = f.store.find_last_message(room.id).await.unwrap().unwrap();
        assert_eq!(last.message_type, MessageType::Join);
        assert_eq!(last.content, "bob joined the group");
    }

    #[tokio::test]
    async fn test_remove_participant_privileges() {
        let f = fixture().await;
        let room = f
            .rooms
            .create_group_room(f.alice, "team", None, None, &[f.bob, f.carol])
            .await
            .unwrap();

        // A plain member cannot remove another member.
        let err = f
            .rooms
            .remove_participant(room.id, f.bob, f.carol)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));

        // Self-leave is always allowed.
        let room_after = f.rooms.leave_room(room.id, f.bob).await.unwrap();
        assert!(!room_after.has_participant(f.bob));

        // The creator can remove anyone.
        let room_after = f
            .rooms
            .remove_participant(room.id, f.alice, f.carol)
            .await
            .unwrap();
        assert!(!room_after.has_participant(f.carol));
        assert!(!f.rooms.is_participant(room.id, f.carol).await.unwrap());

        let last = f.store.find_last_message(room.id).await.unwrap().unwrap();
        assert_eq!(last.message_type, MessageType::Leave);
        assert_eq!(last.content, "carol left the group");
    }

    #[tokio::test]
    async fn test_update_metadata_whitelist() {
        let f = fixture().await;
        let room = f
            .rooms
            .create_group_room(f.alice, "team", Some("old".into()), None, &[f.bob])
            .await
            .unwrap();

        let err = f
            .rooms
            .update_metadata(room.id, f.bob, RoomUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));

        let updated = f
            .rooms
            .update_metadata(
                room.id,
                f.alice,
                RoomUpdate {
                    description: Some("new purpose".into()),
                    ..RoomUpdate::default()
                },
            )
            .await
            .unwrap();
        // Untouched fields survive.
        assert_eq!(updated.name, "team");
        assert_eq!(updated.description.as_deref(), Some("new purpose"));
    }

    #[tokio::test]
    async fn test_delete_room_creator_only_and_cascades() {
        let f = fixture().await;
        let room = f
            .rooms
            .create_group_room(f.bob, "team", None, None, &[f.alice])
            .await
            .unwrap();

        let err = f.rooms.delete_room(room.id, f.alice).await.unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));
        // Room and its messages are intact after the failed attempt.
        assert!(f.store.find_room_by_id(room.id).await.unwrap().is_some());
        assert!(f.store.count_messages(room.id).await.unwrap() > 0);

        f.rooms.delete_room(room.id, f.bob).await.unwrap();
        assert!(f.store.find_room_by_id(room.id).await.unwrap().is_none());
        assert_eq!(f.store.count_messages(room.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_system_messages_are_broadcast() {
        let f = fixture().await;
        let room = f
            .rooms
            .create_group_room(f.alice, "team", None, None, &[])
            .await
            .unwrap();

        let mut rx = f.router.subscribe("conn-1", Topic::Room(room.id)).unwrap();
        f.rooms.add_participant(room.id, f.alice, f.bob).await.unwrap();

        let envelope = rx.try_recv().unwrap();
        match &envelope.event {
            Event::Message(e) => {
                assert_eq!(e.message_type, MessageType::Join);
                assert_eq!(e.content, "bob joined the group");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_search_rooms_scoped_to_requester() {
        let f = fixture().await;
        f.rooms
            .create_group_room(f.alice, "rust-team", None, None, &[])
            .await
            .unwrap();
        f.rooms
            .create_group_room(f.bob, "rust-outsiders", None, None, &[])
            .await
            .unwrap();

        let hits = f.rooms.search_rooms(f.alice, "RUST").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "rust-team");
    }
}
