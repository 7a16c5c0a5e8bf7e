//! Error taxonomy for Roomcast core operations.
//!
//! Every service operation surfaces one of these variants; connection
//! handlers recover all of them at the boundary instead of crashing.

use crate::model::{RoomId, UserId};
use thiserror::Error;

/// Errors surfaced by the room, message, and presence services.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A referenced room, message, or user does not exist.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Resource kind ("room", "message", "user").
        resource: &'static str,
        /// The id that failed to resolve.
        id: i64,
    },

    /// A room with the requested name already exists.
    #[error("room name already exists: {0}")]
    NameConflict(String),

    /// The acting principal lacks a permission it could otherwise have
    /// (wrong author, not the creator).
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    /// The acting principal is not a participant of the room. Distinct
    /// from [`ChatError::Unauthorized`]: the room is not visible at all.
    #[error("user {user_id} is not a participant of room {room_id}")]
    NotParticipant {
        /// The rejected principal.
        user_id: UserId,
        /// The room the principal tried to touch.
        room_id: RoomId,
    },

    /// Structurally nonsensical request (editing a system message,
    /// adding a participant to a private room, ...).
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// Failure inside the external record store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ChatError {
    /// Shorthand for a not-found error.
    #[must_use]
    pub fn not_found(resource: &'static str, id: i64) -> Self {
        ChatError::NotFound { resource, id }
    }

    /// Wire error code for this error, carried in protocol `error`
    /// frames and stable across releases.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            ChatError::NotFound { .. } => 1001,
            ChatError::NameConflict(_) => 1002,
            ChatError::Unauthorized(_) => 1003,
            ChatError::NotParticipant { .. } => 1004,
            ChatError::InvalidOperation(_) => 1005,
            ChatError::Store(_) => 1100,
        }
    }

    /// Whether this error should be logged as an internal fault rather
    /// than a client mistake.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, ChatError::Store(_))
    }
}

/// Errors reported by a [`crate::store::RoomStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated (duplicate room name).
    ///
    /// The private-room creation path relies on this variant to resolve
    /// concurrent creation races by re-reading.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The record to update or delete is gone.
    #[error("record not found")]
    NotFound,

    /// Backend failure (I/O, connection loss, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Credential verification failures.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The credential is missing, malformed, expired, or forged.
    #[error("invalid credential")]
    InvalidCredential,
}
