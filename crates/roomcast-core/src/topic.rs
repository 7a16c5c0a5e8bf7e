//! Typed routing keys for pub/sub delivery.
//!
//! Topics are never persisted; they exist only while a subscriber holds
//! them. The grammar is closed: anything the parser rejects cannot be
//! subscribed to or published on.

use crate::model::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum rendered topic length accepted by the parser.
pub const MAX_TOPIC_LENGTH: usize = 64;

/// A routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    /// New messages in a room: `room:<id>`.
    Room(RoomId),
    /// Typing indicators for a room: `room:<id>:typing`.
    Typing(RoomId),
    /// Edited messages in a room: `room:<id>:edited`.
    Edited(RoomId),
    /// Deleted message ids in a room: `room:<id>:deleted`.
    Deleted(RoomId),
    /// Global presence feed: `presence`.
    Presence,
    /// Private per-user delivery: `user:<id>`.
    User(UserId),
}

impl Topic {
    /// The room this topic is scoped to, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Topic::Room(id) | Topic::Typing(id) | Topic::Edited(id) | Topic::Deleted(id) => {
                Some(*id)
            }
            Topic::Presence | Topic::User(_) => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Room(id) => write!(f, "room:{id}"),
            Topic::Typing(id) => write!(f, "room:{id}:typing"),
            Topic::Edited(id) => write!(f, "room:{id}:edited"),
            Topic::Deleted(id) => write!(f, "room:{id}:deleted"),
            Topic::Presence => write!(f, "presence"),
            Topic::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Topic parse failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicParseError {
    /// The string does not match the topic grammar.
    #[error("invalid topic: {0}")]
    Invalid(String),
    /// The string exceeds [`MAX_TOPIC_LENGTH`].
    #[error("topic too long")]
    TooLong,
}

impl FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MAX_TOPIC_LENGTH {
            return Err(TopicParseError::TooLong);
        }
        if s == "presence" {
            return Ok(Topic::Presence);
        }

        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("room"), Some(id), suffix, None) => {
                let id: RoomId = id
                    .parse()
                    .map_err(|_| TopicParseError::Invalid(s.to_string()))?;
                match suffix {
                    None => Ok(Topic::Room(id)),
                    Some("typing") => Ok(Topic::Typing(id)),
                    Some("edited") => Ok(Topic::Edited(id)),
                    Some("deleted") => Ok(Topic::Deleted(id)),
                    Some(_) => Err(TopicParseError::Invalid(s.to_string())),
                }
            }
            (Some("user"), Some(id), None, None) => {
                let id: UserId = id
                    .parse()
                    .map_err(|_| TopicParseError::Invalid(s.to_string()))?;
                Ok(Topic::User(id))
            }
            _ => Err(TopicParseError::Invalid(s.to_string())),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}
