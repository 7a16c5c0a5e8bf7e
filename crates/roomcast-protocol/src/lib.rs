//! # roomcast-protocol
//!
//! Wire protocol definitions for the Roomcast realtime chat engine.
//!
//! This crate defines the JSON text protocol spoken over a WebSocket
//! between Roomcast clients and servers: frame types, the codec, and
//! versioning.
//!
//! ## Frame Types
//!
//! - `Subscribe` / `Unsubscribe` - Topic membership
//! - `Send` / `Edit` / `Delete` - Message lifecycle
//! - `Typing` / `Status` - Transient indicators and presence
//! - `Recent` / `History` - Replay on rejoin
//! - `Ack` / `Error` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, Frame};
//!
//! let frame = Frame::send(1, 42, "Hello, room!");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod frames;

/// Current protocol version, advertised in the `connected` frame.
/// Incremented on breaking wire changes; a client seeing an unexpected
/// version should disconnect.
pub const PROTOCOL_VERSION: u8 = 1;

pub use codec::{decode, encode, ProtocolError};
pub use frames::Frame;
