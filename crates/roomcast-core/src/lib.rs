//! # roomcast-core
//!
//! Core model, services, and message routing for the Roomcast realtime
//! chat engine.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Model** - Users, rooms, and messages, referenced by id
//! - **Topic** - Typed routing keys for pub/sub delivery
//! - **Router** - Single-process pub/sub fan-out
//! - **Sessions** - Live authenticated connections and their subscriptions
//! - **Rooms** - Membership rules and room lifecycle
//! - **Messages** - Send/edit/delete lifecycle and replay
//! - **Presence** - Online/offline status derived from connections
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Connection │───▶│   Session    │───▶│    Router    │
//! └────────────┘    │   Registry   │    │ (per topic)  │
//!                   └──────────────┘    └──────────────┘
//!                          │                   ▲
//!                          ▼                   │ publish last
//!                   ┌──────────────┐    ┌──────────────┐
//!                   │   Presence   │    │ Rooms/Msgs   │──▶ RoomStore
//!                   └──────────────┘    └──────────────┘
//! ```
//!
//! Storage and credential verification are external collaborators behind
//! the [`store::RoomStore`] and [`store::IdentityVerifier`] traits.

pub mod error;
pub mod events;
pub mod memory;
pub mod messages;
pub mod model;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod session;
pub mod store;
pub mod topic;

pub use error::{ChatError, StoreError, VerifyError};
pub use events::{Envelope, Event, MessageDeletedEvent, MessageEvent, PresenceEvent, TypingEvent};
pub use memory::MemoryStore;
pub use messages::MessageService;
pub use model::{Message, MessageId, MessageType, Room, RoomId, RoomType, User, UserId, UserStatus};
pub use presence::PresenceTracker;
pub use rooms::RoomService;
pub use router::{Router, RouterConfig, RouterError};
pub use session::{ConnectionId, SessionError, SessionHandle, SessionRegistry};
pub use store::{IdentityVerifier, RoomStore};
pub use topic::Topic;
