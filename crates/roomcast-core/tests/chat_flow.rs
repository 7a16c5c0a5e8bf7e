//! End-to-end flows across the room, message, session, and presence
//! services wired over the in-memory store.

use roomcast_core::events::Event;
use roomcast_core::{
    ChatError, ConnectionId, MemoryStore, MessageService, MessageType, PresenceTracker,
    RoomService, RoomStore, Router, SessionRegistry, Topic, UserId, UserStatus,
};
use std::sync::Arc;

struct Harness {
    store: Arc<MemoryStore>,
    router: Arc<Router>,
    registry: SessionRegistry,
    rooms: Arc<RoomService>,
    messages: MessageService,
    presence: PresenceTracker,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let router = Arc::new(Router::new());
        let registry = SessionRegistry::new(Arc::clone(&router), 64);
        let rooms = Arc::new(RoomService::new(
            store.clone() as Arc<dyn RoomStore>,
            Arc::clone(&router),
        ));
        let messages = MessageService::new(
            store.clone() as Arc<dyn RoomStore>,
            Arc::clone(&rooms),
            Arc::clone(&router),
        );
        let presence = PresenceTracker::new(
            store.clone() as Arc<dyn RoomStore>,
            Arc::clone(&router),
        );
        Self {
            store,
            router,
            registry,
            rooms,
            messages,
            presence,
        }
    }

    /// Register a connection for a user and subscribe it to a topic.
    fn open(
        &self,
        user_id: UserId,
        topic: Topic,
    ) -> (
        ConnectionId,
        tokio::sync::broadcast::Receiver<Arc<roomcast_core::Envelope>>,
    ) {
        let conn = ConnectionId::generate();
        self.registry.register(conn.clone(), user_id).unwrap();
        let rx = self.registry.subscribe(&conn, topic).unwrap().unwrap();
        (conn, rx)
    }
}

#[tokio::test]
async fn test_group_message_fans_out_to_participants_only() {
    let h = Harness::new();
    let alice = h.store.seed_user("alice").await.id;
    let bob = h.store.seed_user("bob").await.id;
    let carol = h.store.seed_user("carol").await.id;

    let room = h
        .rooms
        .create_group_room(alice, "launch-room", None, None, &[bob])
        .await
        .unwrap();

    let (_c1, mut rx_alice) = h.open(alice, Topic::Room(room.id));
    let (_c2, mut rx_bob) = h.open(bob, Topic::Room(room.id));

    let sent = h
        .messages
        .send(alice, room.id, "ship it", MessageType::Chat)
        .await
        .unwrap();

    for rx in [&mut rx_alice, &mut rx_bob] {
        let envelope = rx.try_recv().unwrap();
        match &envelope.event {
            Event::Message(e) => {
                assert_eq!(e.id, sent.id);
                assert_eq!(e.content, "ship it");
                assert_eq!(e.sender_username, "alice");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // A non-participant cannot send into the room.
    let err = h
        .messages
        .send(carol, room.id, "let me in", MessageType::Chat)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotParticipant { .. }));
}

#[tokio::test]
async fn test_concurrent_private_room_creation_converges() {
    let h = Harness::new();
    let alice = h.store.seed_user("alice").await.id;
    let bob = h.store.seed_user("bob").await.id;
    let rooms = Arc::clone(&h.rooms);

    let mut handles = Vec::new();
    for i in 0..8 {
        let rooms = Arc::clone(&rooms);
        // Alternate caller direction; the pair key is symmetric.
        let (a, b) = if i % 2 == 0 { (alice, bob) } else { (bob, alice) };
        handles.push(tokio::spawn(async move {
            rooms.get_or_create_private_room(a, b).await.unwrap().id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "all callers must land on one room");

    let listed = h.rooms.rooms_for_user(alice).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_edit_reaches_edited_topic_exactly_once() {
    let h = Harness::new();
    let alice = h.store.seed_user("alice").await.id;
    let bob = h.store.seed_user("bob").await.id;
    let room = h
        .rooms
        .create_group_room(alice, "drafts", None, None, &[bob])
        .await
        .unwrap();

    let sent = h
        .messages
        .send(alice, room.id, "frist", MessageType::Chat)
        .await
        .unwrap();

    let (_c, mut rx) = h.open(bob, Topic::Edited(room.id));
    h.messages.edit(sent.id, alice, "first").await.unwrap();

    let envelope = rx.try_recv().unwrap();
    match &envelope.event {
        Event::MessageEdited(e) => {
            assert_eq!(e.content, "first");
            assert!(e.is_edited);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(rx.try_recv().is_err(), "edit must broadcast exactly once");
}

#[tokio::test]
async fn test_room_deletion_is_creator_only_and_cascades() {
    let h = Harness::new();
    let alice = h.store.seed_user("alice").await.id;
    let bob = h.store.seed_user("bob").await.id;
    let room = h
        .rooms
        .create_group_room(alice, "ephemeral", None, None, &[bob])
        .await
        .unwrap();
    h.messages
        .send(bob, room.id, "save this", MessageType::Chat)
        .await
        .unwrap();

    let err = h.rooms.delete_room(room.id, bob).await.unwrap_err();
    assert!(matches!(err, ChatError::Unauthorized(_)));

    h.rooms.delete_room(room.id, alice).await.unwrap();
    let err = h.rooms.get_room(room.id, alice).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound { .. }));
    assert_eq!(h.store.count_messages(room.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_disconnect_drives_presence_offline() {
    let h = Harness::new();
    let alice = h.store.seed_user("alice").await.id;
    let bob = h.store.seed_user("bob").await.id;

    let (_watcher, mut rx) = h.open(bob, Topic::Presence);

    let conn = ConnectionId::generate();
    h.registry.register(conn.clone(), alice).unwrap();
    h.presence.connected(alice).await.unwrap();

    let envelope = rx.try_recv().unwrap();
    match &envelope.event {
        Event::Presence(e) => {
            assert_eq!(e.user_id, alice);
            assert_eq!(e.status, UserStatus::Online);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Transport-level teardown: the registry yields the principal, the
    // tracker flips them offline.
    let principal = h.registry.drop_connection(&conn).unwrap();
    h.presence.disconnected(principal).await.unwrap();

    let envelope = rx.try_recv().unwrap();
    match &envelope.event {
        Event::Presence(e) => assert_eq!(e.status, UserStatus::Offline),
        other => panic!("unexpected event: {other:?}"),
    }

    let stored = h.store.find_user_by_id(alice).await.unwrap().unwrap();
    assert!(stored.last_seen_at.is_some());
}

#[tokio::test]
async fn test_replay_after_rejoin() {
    let h = Harness::new();
    let alice = h.store.seed_user("alice").await.id;
    let bob = h.store.seed_user("bob").await.id;
    let room = h
        .rooms
        .create_group_room(alice, "standup", None, None, &[bob])
        .await
        .unwrap();

    // Bob is away while alice talks.
    for content in ["morning", "update one", "update two"] {
        h.messages
            .send(alice, room.id, content, MessageType::Chat)
            .await
            .unwrap();
    }

    // On rejoin, bob replays the tail in chronological order.
    let replay = h.messages.recent(room.id, bob, 2).await.unwrap();
    let contents: Vec<_> = replay.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["update one", "update two"]);
}
