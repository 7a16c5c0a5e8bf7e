//! Codec for encoding and decoding Roomcast frames.
//!
//! Frames travel as JSON text messages over the WebSocket, one frame per
//! message. The codec only adds a size guard on top of serde_json.

use thiserror::Error;

use crate::frames::Frame;

/// Maximum encoded frame size (64 KiB).
///
/// Message content is capped well below this; the guard exists to bound
/// what a client can make the server parse.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON (de)serialization error.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a frame to JSON text.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a valid frame.
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_core::Topic;

    #[test]
    fn test_encode_decode_roundtrip() {
        let frames = vec![
            Frame::subscribe(1, Topic::Room(9)),
            Frame::send(2, 9, "Hello, room!"),
            Frame::edit(3, 41, "Hello again"),
            Frame::delete(4, 41),
            Frame::ack(2),
            Frame::error(3, 1003, "only the author may modify a message"),
            Frame::ping(),
            Frame::connected("conn-abc", 1, 30_000, 7),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_rejects_oversized_text() {
        let huge = format!(
            r#"{{"type":"send","id":1,"roomId":2,"content":"{}"}}"#,
            "x".repeat(MAX_FRAME_SIZE)
        );
        assert!(matches!(
            decode(&huge),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(matches!(
            decode(r#"{"type":"teleport","id":1}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_topic() {
        assert!(matches!(
            decode(r#"{"type":"subscribe","id":1,"topic":"room:abc"}"#),
            Err(ProtocolError::Json(_))
        ));
    }
}
