//! Presence tracking across connections.
//!
//! A user may hold several live connections at once; the tracker
//! refcounts them so only the edges of the automatic transitions are
//! visible. The first connection flips the user ONLINE, the last
//! disconnect flips them OFFLINE and stamps `last_seen`. An explicit
//! status request overrides all of that: any of the four statuses is
//! accepted as requested, with or without a live connection. Every
//! visible transition is persisted first and then published on the
//! global `presence` topic.

use crate::error::ChatError;
use crate::events::{Envelope, PresenceEvent};
use crate::model::{User, UserId, UserStatus};
use crate::router::Router;
use crate::store::RoomStore;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Presence state: connection refcounts plus the last broadcast status
/// per user.
pub struct PresenceTracker {
    store: Arc<dyn RoomStore>,
    router: Arc<Router>,
    refcounts: DashMap<UserId, usize>,
    statuses: DashMap<UserId, UserStatus>,
}

impl PresenceTracker {
    /// Create the tracker.
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, router: Arc<Router>) -> Self {
        Self {
            store,
            router,
            refcounts: DashMap::new(),
            statuses: DashMap::new(),
        }
    }

    async fn load_user(&self, id: UserId) -> Result<User, ChatError> {
        self.store
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| ChatError::not_found("user", id))
    }

    async fn persist_and_publish(
        &self,
        user_id: UserId,
        status: UserStatus,
    ) -> Result<(), ChatError> {
        let last_seen = (status == UserStatus::Offline).then(Utc::now);
        self.store
            .update_user_status(user_id, status, last_seen)
            .await?;
        let user = self.load_user(user_id).await?;
        info!(user_id, ?status, "presence transition");
        self.router.publish(Envelope::presence(PresenceEvent {
            user_id,
            username: user.username,
            status,
            timestamp: Utc::now(),
        }));
        Ok(())
    }

    fn record_status(&self, user_id: UserId, status: UserStatus) {
        if status == UserStatus::Offline {
            self.statuses.remove(&user_id);
        } else {
            self.statuses.insert(user_id, status);
        }
    }

    /// Record a new connection for a user.
    ///
    /// The first connection broadcasts ONLINE; additional connections for
    /// an already-online user are silent.
    pub async fn connected(&self, user_id: UserId) -> Result<(), ChatError> {
        let first = {
            let mut entry = self.refcounts.entry(user_id).or_insert(0);
            *entry += 1;
            *entry == 1
        };

        if first {
            self.record_status(user_id, UserStatus::Online);
            self.persist_and_publish(user_id, UserStatus::Online).await
        } else {
            debug!(user_id, "additional connection for online user");
            Ok(())
        }
    }

    /// Record a closed connection for a user.
    ///
    /// The last disconnect broadcasts OFFLINE and stamps `last_seen`;
    /// earlier disconnects are silent. A disconnect for an untracked user
    /// is a no-op.
    pub async fn disconnected(&self, user_id: UserId) -> Result<(), ChatError> {
        let last = {
            let Some(mut entry) = self.refcounts.get_mut(&user_id) else {
                return Ok(());
            };
            *entry = entry.saturating_sub(1);
            *entry == 0
        };

        if last {
            self.refcounts.remove(&user_id);
            self.record_status(user_id, UserStatus::Offline);
            self.persist_and_publish(user_id, UserStatus::Offline).await
        } else {
            debug!(user_id, "connection closed, user still online elsewhere");
            Ok(())
        }
    }

    /// Explicitly set a user's status.
    ///
    /// All four statuses are accepted as requested, independent of any
    /// live connections; the refcount governs only the automatic
    /// connect/disconnect transitions. Requesting the current status is
    /// a silent no-op.
    pub async fn set_status(&self, user_id: UserId, status: UserStatus) -> Result<(), ChatError> {
        if self.status_of(user_id) == status {
            return Ok(());
        }
        self.record_status(user_id, status);
        self.persist_and_publish(user_id, status).await
    }

    /// Current status of a user as the tracker sees it.
    #[must_use]
    pub fn status_of(&self, user_id: UserId) -> UserStatus {
        self.statuses
            .get(&user_id)
            .map(|e| *e)
            .unwrap_or(UserStatus::Offline)
    }

    /// Number of users with at least one live connection.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.refcounts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::memory::MemoryStore;
    use crate::topic::Topic;
    use tokio::sync::broadcast::error::TryRecvError;

    async fn fixture() -> (Arc<MemoryStore>, Arc<Router>, PresenceTracker, UserId) {
        let store = Arc::new(MemoryStore::new());
        let router = Arc::new(Router::new());
        let tracker = PresenceTracker::new(
            store.clone() as Arc<dyn RoomStore>,
            Arc::clone(&router),
        );
        let user_id = store.seed_user("alice").await.id;
        (store, router, tracker, user_id)
    }

    fn expect_presence(
        rx: &mut tokio::sync::broadcast::Receiver<Arc<Envelope>>,
        status: UserStatus,
    ) {
        let envelope = rx.try_recv().unwrap();
        match &envelope.event {
            Event::Presence(e) => assert_eq!(e.status, status),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_only_edges_are_broadcast() {
        let (_store, router, tracker, alice) = fixture().await;
        let mut rx = router.subscribe("watcher", Topic::Presence).unwrap();

        tracker.connected(alice).await.unwrap();
        expect_presence(&mut rx, UserStatus::Online);

        // Second device: no broadcast.
        tracker.connected(alice).await.unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        // First disconnect: still online elsewhere, no broadcast.
        tracker.disconnected(alice).await.unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(tracker.status_of(alice), UserStatus::Online);

        // Last disconnect: offline edge.
        tracker.disconnected(alice).await.unwrap();
        expect_presence(&mut rx, UserStatus::Offline);
        assert_eq!(tracker.status_of(alice), UserStatus::Offline);
    }

    #[tokio::test]
    async fn test_offline_stamps_last_seen() {
        let (store, _router, tracker, alice) = fixture().await;

        tracker.connected(alice).await.unwrap();
        let online = store.find_user_by_id(alice).await.unwrap().unwrap();
        assert_eq!(online.status, UserStatus::Online);

        tracker.disconnected(alice).await.unwrap();
        let offline = store.find_user_by_id(alice).await.unwrap().unwrap();
        assert_eq!(offline.status, UserStatus::Offline);
        assert!(offline.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn test_explicit_status_independent_of_connections() {
        let (store, router, tracker, alice) = fixture().await;
        let mut rx = router.subscribe("watcher", Topic::Presence).unwrap();

        // No live connection: the request is still honored.
        tracker.set_status(alice, UserStatus::Away).await.unwrap();
        expect_presence(&mut rx, UserStatus::Away);
        assert_eq!(tracker.status_of(alice), UserStatus::Away);
        let stored = store.find_user_by_id(alice).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Away);

        // OFFLINE can be requested too, and stamps last-seen.
        tracker.set_status(alice, UserStatus::Offline).await.unwrap();
        expect_presence(&mut rx, UserStatus::Offline);
        let stored = store.find_user_by_id(alice).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Offline);
        assert!(stored.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn test_explicit_status_while_connected() {
        let (_store, router, tracker, alice) = fixture().await;

        tracker.connected(alice).await.unwrap();
        let mut rx = router.subscribe("watcher", Topic::Presence).unwrap();

        tracker.set_status(alice, UserStatus::Busy).await.unwrap();
        expect_presence(&mut rx, UserStatus::Busy);
        assert_eq!(tracker.status_of(alice), UserStatus::Busy);

        // Requesting the current status again is silent.
        tracker.set_status(alice, UserStatus::Busy).await.unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        // The automatic offline edge still fires on the last disconnect.
        tracker.disconnected(alice).await.unwrap();
        expect_presence(&mut rx, UserStatus::Offline);
        assert_eq!(tracker.status_of(alice), UserStatus::Offline);
    }

    #[tokio::test]
    async fn test_reconnect_resets_explicit_status() {
        let (_store, router, tracker, alice) = fixture().await;

        tracker.set_status(alice, UserStatus::Busy).await.unwrap();
        let mut rx = router.subscribe("watcher", Topic::Presence).unwrap();

        // A fresh first connection overrides the explicit state.
        tracker.connected(alice).await.unwrap();
        expect_presence(&mut rx, UserStatus::Online);
        assert_eq!(tracker.status_of(alice), UserStatus::Online);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_user_is_noop() {
        let (_store, _router, tracker, alice) = fixture().await;
        tracker.disconnected(alice).await.unwrap();
        assert_eq!(tracker.online_count(), 0);
    }
}
