//! Session registry: live authenticated connections and their
//! subscriptions.
//!
//! A connection is bound to exactly one principal for its lifetime.
//! Subscriptions are additive and idempotent; dropping a connection
//! atomically removes it from every topic it held.

use crate::model::UserId;
use crate::router::{Router, RouterError};
use crate::events::Envelope;
use crate::topic::Topic;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wrap an externally assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique id.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}_{counter:x}"))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The connection id is already registered.
    #[error("connection already registered: {0}")]
    AlreadyRegistered(ConnectionIdDisplay),

    /// No session exists for the connection id.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionIdDisplay),

    /// The per-connection subscription cap was hit.
    #[error("maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Router-level failure.
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Owned string form of a connection id, kept so the error enum stays
/// `Eq` without borrowing.
pub type ConnectionIdDisplay = String;

/// Handle returned by [`SessionRegistry::register`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// The registered connection id.
    pub connection_id: ConnectionId,
    /// The authenticated principal.
    pub principal: UserId,
}

struct SessionEntry {
    principal: UserId,
    topics: DashSet<Topic>,
    created_at: DateTime<Utc>,
}

/// Tracks every live connection, its principal, and its topic
/// subscriptions; owns the only write path into the [`Router`]'s
/// subscriber sets.
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, SessionEntry>,
    router: Arc<Router>,
    max_subscriptions_per_connection: usize,
}

impl SessionRegistry {
    /// Create a registry over a router.
    #[must_use]
    pub fn new(router: Arc<Router>, max_subscriptions_per_connection: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            router,
            max_subscriptions_per_connection,
        }
    }

    /// Register an authenticated connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection id is already registered.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        principal: UserId,
    ) -> Result<SessionHandle, SessionError> {
        use dashmap::mapref::entry::Entry;
        match self.sessions.entry(connection_id.clone()) {
            Entry::Occupied(_) => Err(SessionError::AlreadyRegistered(connection_id.0)),
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    principal,
                    topics: DashSet::new(),
                    created_at: Utc::now(),
                });
                debug!(connection = %connection_id, user_id = principal, "session registered");
                Ok(SessionHandle {
                    connection_id,
                    principal,
                })
            }
        }
    }

    /// Subscribe a connection to a topic.
    ///
    /// Idempotent: subscribing to an already-held topic returns
    /// `Ok(None)` and leaves the existing receiver untouched.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown connections or when the subscription
    /// cap is hit.
    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
        topic: Topic,
    ) -> Result<Option<broadcast::Receiver<Arc<Envelope>>>, SessionError> {
        let entry = self
            .sessions
            .get(connection_id)
            .ok_or_else(|| SessionError::UnknownConnection(connection_id.0.clone()))?;

        if entry.topics.contains(&topic) {
            return Ok(None);
        }
        if entry.topics.len() >= self.max_subscriptions_per_connection {
            return Err(SessionError::MaxSubscriptionsReached);
        }

        let receiver = self.router.subscribe(connection_id.as_str(), topic)?;
        entry.topics.insert(topic);
        Ok(Some(receiver))
    }

    /// Unsubscribe a connection from a topic. Unknown topics are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown connections.
    pub fn unsubscribe(
        &self,
        connection_id: &ConnectionId,
        topic: Topic,
    ) -> Result<(), SessionError> {
        let entry = self
            .sessions
            .get(connection_id)
            .ok_or_else(|| SessionError::UnknownConnection(connection_id.0.clone()))?;

        if entry.topics.remove(&topic).is_some() {
            // The registry set is authoritative; a router miss here means
            // teardown already ran.
            let _ = self.router.unsubscribe(connection_id.as_str(), topic);
        }
        Ok(())
    }

    /// Drop a connection: remove the session and every router
    /// subscription it held. After this returns, no publish reaches the
    /// connection.
    ///
    /// Returns the principal so the caller can drive the presence
    /// OFFLINE transition, or `None` if the connection was unknown.
    pub fn drop_connection(&self, connection_id: &ConnectionId) -> Option<UserId> {
        let (_, entry) = self.sessions.remove(connection_id)?;
        for topic in entry.topics.iter() {
            let _ = self.router.unsubscribe(connection_id.as_str(), *topic);
        }
        debug!(connection = %connection_id, user_id = entry.principal, "session dropped");
        Some(entry.principal)
    }

    /// The principal bound to a connection.
    #[must_use]
    pub fn principal_of(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.sessions.get(connection_id).map(|e| e.principal)
    }

    /// Topics a connection currently subscribes to.
    #[must_use]
    pub fn topics_of(&self, connection_id: &ConnectionId) -> Vec<Topic> {
        self.sessions
            .get(connection_id)
            .map(|e| e.topics.iter().map(|t| *t).collect())
            .unwrap_or_default()
    }

    /// When the session was registered.
    #[must_use]
    pub fn created_at(&self, connection_id: &ConnectionId) -> Option<DateTime<Utc>> {
        self.sessions.get(connection_id).map(|e| e.created_at)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Envelope, TypingEvent};

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(Router::new()), 16)
    }

    fn typing(room_id: i64) -> Envelope {
        Envelope::typing(TypingEvent {
            room_id,
            user_id: 1,
            username: "alice".into(),
            is_typing: true,
        })
    }

    #[test]
    fn test_register_binds_one_principal() {
        let registry = registry();
        let conn = ConnectionId::generate();

        let handle = registry.register(conn.clone(), 7).unwrap();
        assert_eq!(handle.principal, 7);
        assert_eq!(registry.principal_of(&conn), Some(7));

        // Re-registering the same connection, even for the same user,
        // is rejected.
        assert!(matches!(
            registry.register(conn, 7),
            Err(SessionError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let registry = registry();
        let conn = ConnectionId::generate();
        registry.register(conn.clone(), 1).unwrap();

        let first = registry.subscribe(&conn, Topic::Room(2)).unwrap();
        assert!(first.is_some());
        let second = registry.subscribe(&conn, Topic::Room(2)).unwrap();
        assert!(second.is_none());
        assert_eq!(registry.topics_of(&conn), vec![Topic::Room(2)]);
    }

    #[test]
    fn test_subscription_cap() {
        let registry = SessionRegistry::new(Arc::new(Router::new()), 1);
        let conn = ConnectionId::generate();
        registry.register(conn.clone(), 1).unwrap();

        registry.subscribe(&conn, Topic::Room(1)).unwrap();
        assert_eq!(
            registry.subscribe(&conn, Topic::Room(2)).unwrap_err(),
            SessionError::MaxSubscriptionsReached
        );
    }

    #[test]
    fn test_drop_connection_unsubscribes_everywhere() {
        let router = Arc::new(Router::new());
        let registry = SessionRegistry::new(Arc::clone(&router), 16);
        let conn = ConnectionId::generate();
        registry.register(conn.clone(), 9).unwrap();

        let mut rx = registry.subscribe(&conn, Topic::Typing(1)).unwrap().unwrap();
        registry.subscribe(&conn, Topic::Presence).unwrap();

        assert_eq!(registry.drop_connection(&conn), Some(9));
        assert_eq!(registry.session_count(), 0);
        assert!(!router.topic_exists(Topic::Typing(1)));
        assert!(!router.topic_exists(Topic::Presence));

        // Nothing published after the drop reaches the old receiver.
        assert_eq!(router.publish(typing(1)), 0);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Closed | broadcast::error::TryRecvError::Empty)
        ));

        // Dropping again is a no-op.
        assert_eq!(registry.drop_connection(&conn), None);
    }

    #[test]
    fn test_unsubscribe_unknown_topic_is_noop() {
        let registry = registry();
        let conn = ConnectionId::generate();
        registry.register(conn.clone(), 1).unwrap();
        registry.unsubscribe(&conn, Topic::Room(99)).unwrap();
    }
}
