//! Length-prefixed JSON framing for the control socket.
//!
//! Each frame is a little-endian u32 byte count followed by one JSON-encoded
//! [`Message`]. Both peers validate the length before allocating.

use crate::message::Message;
use std::io::{self, Write};
use thiserror::Error;

/// Upper bound on a single frame. DATA payloads carry one occupancy matrix
/// per living snake, so frames can get large but never anywhere near this.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("peer sent oversized frame ({0} bytes)")]
    Oversized(usize),
    #[error("malformed message payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode and write a single frame.
pub fn write_frame(writer: &mut impl Write, message: &Message) -> io::Result<()> {
    let bytes = serde_json::to_vec(message)?;
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Incremental frame decoder for a non-blocking byte stream.
///
/// Bytes are appended as they arrive; complete frames are popped off the
/// front. Partial frames stay buffered until the rest shows up.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<Message, FrameError>> {
        if self.buf.len() < 4 {
            return None;
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            // Drop the poisoned buffer; the connection is beyond saving.
            self.buf.clear();
            return Some(Err(FrameError::Oversized(len)));
        }
        if self.buf.len() < 4 + len {
            return None;
        }
        let frame: Vec<u8> = self.buf.drain(..4 + len).skip(4).collect();
        Some(serde_json::from_slice(&frame).map_err(FrameError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageType};

    fn frame_bytes(message: &Message) -> Vec<u8> {
        let mut out = Vec::new();
        write_frame(&mut out, message).unwrap();
        out
    }

    #[test]
    fn round_trips_a_frame() {
        let msg = Message {
            message_id: Some(3),
            kind: MessageType::Ack,
            data: None,
        };
        let mut reader = FrameReader::new();
        reader.extend(&frame_bytes(&msg));
        let decoded = reader.next_frame().unwrap().unwrap();
        assert_eq!(decoded.message_id, Some(3));
        assert_eq!(decoded.kind, MessageType::Ack);
        assert!(reader.next_frame().is_none());
    }

    #[test]
    fn reassembles_split_frames() {
        let msg = Message::new(MessageType::Start, None);
        let bytes = frame_bytes(&msg);
        let mut reader = FrameReader::new();
        reader.extend(&bytes[..3]);
        assert!(reader.next_frame().is_none());
        reader.extend(&bytes[3..]);
        assert!(reader.next_frame().unwrap().is_ok());
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut reader = FrameReader::new();
        let mut bytes = frame_bytes(&Message::new(MessageType::Data, None));
        bytes.extend(frame_bytes(&Message::new(MessageType::Error, None)));
        reader.extend(&bytes);
        assert_eq!(reader.next_frame().unwrap().unwrap().kind, MessageType::Data);
        assert_eq!(reader.next_frame().unwrap().unwrap().kind, MessageType::Error);
        assert!(reader.next_frame().is_none());
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut reader = FrameReader::new();
        reader.extend(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes());
        assert!(matches!(
            reader.next_frame(),
            Some(Err(FrameError::Oversized(_)))
        ));
    }
}
