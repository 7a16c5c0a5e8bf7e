//! The broadcast router: a single-process pub/sub bus keyed by topic.
//!
//! Delivery is best-effort. There is no retry and no durable queue; a
//! subscriber that is absent when an event is published simply misses it
//! and backfills through message replay on rejoin. Per topic, events are
//! delivered to every subscriber in publish order.

use crate::events::Envelope;
use crate::topic::Topic;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default per-topic broadcast capacity.
const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Router errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// The connection already holds a receiver for this topic.
    #[error("already subscribed to topic: {0}")]
    AlreadySubscribed(Topic),

    /// The connection holds no receiver for this topic.
    #[error("not subscribed to topic: {0}")]
    NotSubscribed(Topic),

    /// The topic table is full.
    #[error("maximum topic count reached")]
    MaxTopicsReached,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of live topics.
    pub max_topics: usize,
    /// Per-topic broadcast capacity.
    pub topic_capacity: usize,
    /// Whether to delete topics once their last subscriber leaves.
    pub auto_delete_empty_topics: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_topics: 10_000,
            topic_capacity: DEFAULT_TOPIC_CAPACITY,
            auto_delete_empty_topics: true,
        }
    }
}

/// A live topic: its broadcast sender plus the subscribed connection ids.
struct TopicChannel {
    sender: broadcast::Sender<Arc<Envelope>>,
    subscribers: HashSet<String>,
}

impl TopicChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscribers: HashSet::new(),
        }
    }
}

/// The central pub/sub bus.
///
/// The router only knows topics and their subscribers; which connection
/// holds which subscription is the session registry's concern.
pub struct Router {
    topics: DashMap<Topic, TopicChannel>,
    config: RouterConfig,
}

impl Router {
    /// Create a router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            topics: DashMap::new(),
            config,
        }
    }

    /// Subscribe a connection to a topic, creating the topic on demand.
    ///
    /// Returns a receiver for envelopes published on the topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection already subscribes to the topic
    /// or the topic table is full.
    pub fn subscribe(
        &self,
        connection_id: &str,
        topic: Topic,
    ) -> Result<broadcast::Receiver<Arc<Envelope>>, RouterError> {
        if !self.topics.contains_key(&topic) && self.topics.len() >= self.config.max_topics {
            return Err(RouterError::MaxTopicsReached);
        }

        let mut entry = self
            .topics
            .entry(topic)
            .or_insert_with(|| TopicChannel::new(self.config.topic_capacity));

        if !entry.subscribers.insert(connection_id.to_string()) {
            return Err(RouterError::AlreadySubscribed(topic));
        }

        debug!(%topic, connection = %connection_id, subscribers = entry.subscribers.len(), "subscribed");
        Ok(entry.sender.subscribe())
    }

    /// Unsubscribe a connection from a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection was not subscribed.
    pub fn unsubscribe(&self, connection_id: &str, topic: Topic) -> Result<(), RouterError> {
        let Some(mut entry) = self.topics.get_mut(&topic) else {
            return Err(RouterError::NotSubscribed(topic));
        };

        if !entry.subscribers.remove(connection_id) {
            return Err(RouterError::NotSubscribed(topic));
        }
        debug!(%topic, connection = %connection_id, "unsubscribed");

        if self.config.auto_delete_empty_topics && entry.subscribers.is_empty() {
            drop(entry); // release the shard lock before removal
            self.topics.remove(&topic);
            trace!(%topic, "deleted empty topic");
        }
        Ok(())
    }

    /// Publish an envelope to its topic.
    ///
    /// Returns the number of subscribers the envelope was handed to.
    /// Publishing to a topic nobody subscribes to is a no-op. The call
    /// never blocks on slow subscribers beyond enqueueing; a lagged
    /// receiver drops its oldest events.
    pub fn publish(&self, envelope: Envelope) -> usize {
        let topic = envelope.topic;
        let Some(entry) = self.topics.get(&topic) else {
            trace!(%topic, "publish with no subscribers");
            return 0;
        };

        match entry.sender.send(Arc::new(envelope)) {
            Ok(count) => {
                trace!(%topic, recipients = count, "published");
                count
            }
            Err(_) => {
                // Subscriber set says someone is there but every receiver
                // is gone; the registry will clean the entry up on drop.
                warn!(%topic, "publish raced subscriber teardown");
                0
            }
        }
    }

    /// Whether a topic currently exists.
    #[must_use]
    pub fn topic_exists(&self, topic: Topic) -> bool {
        self.topics.contains_key(&topic)
    }

    /// Subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .get(&topic)
            .map(|e| e.subscribers.len())
            .unwrap_or(0)
    }

    /// Number of live topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
