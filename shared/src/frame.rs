//! Length-prefixed frame codec for the TCP transport
//!
//! A frame is a 6-byte header (`message_id: u16`, `payload_length: u32`,
//! both big-endian) followed by `payload_length` bytes of UTF-8 JSON.
//! The decoder accumulates raw socket bytes per session and drains complete
//! frames without ever blocking on a partial one.

use thiserror::Error;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 6;

/// Upper bound on a whole frame, header included.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Largest payload that fits inside a frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Fatal framing failures. Any of these tears down the session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// A frame declared a payload larger than [`MAX_PAYLOAD_LEN`].
    #[error("declared payload of {0} bytes exceeds the {MAX_PAYLOAD_LEN} byte limit")]
    Oversized(usize),

    /// The receive buffer grew past [`MAX_FRAME_LEN`] without containing a
    /// complete frame.
    #[error("receive buffer overflow")]
    BufferOverflow,
}

/// Encodes a single frame ready for the wire.
pub fn encode_frame(message_id: u16, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::Oversized(payload.len()));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&message_id.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Per-session inbound frame accumulator.
///
/// Bytes arrive from the socket in arbitrary chunks; `extend` appends them
/// and `next_frame` repeatedly drains complete frames. A partial frame stays
/// buffered until the rest of it arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes received from the socket.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        // The buffer never holds more than one maximum-size frame; a peer
        // pushing past that bound without completing a frame is broken or
        // hostile.
        if self.buf.len() + bytes.len() > MAX_FRAME_LEN {
            return Err(FrameError::BufferOverflow);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Drains one complete frame, or returns `None` while the buffered data
    /// is still partial.
    pub fn next_frame(&mut self) -> Result<Option<(u16, Vec<u8>)>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let message_id = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        let payload_len =
            u32::from_be_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]]) as usize;

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(FrameError::Oversized(payload_len));
        }

        if self.buf.len() < HEADER_LEN + payload_len {
            return Ok(None);
        }

        let payload = self.buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
        self.buf.drain(..HEADER_LEN + payload_len);
        Ok(Some((message_id, payload)))
    }

    /// True when no partial frame is buffered. Used to distinguish a clean
    /// EOF from one that truncated a frame mid-flight.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
