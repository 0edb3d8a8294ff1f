//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 14 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! # Example
//!
//! ```ignore
//! use worker_fetch::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from socket
//! let frames = buffer.push(&chunk)?;
//!
//! for frame in frames {
//!     let message = frame.into_message()?;
//! }
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// Default initial buffer capacity (64KB).
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 14 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Every header is validated before its payload is awaited, so an unknown
/// kind or an oversized payload fails fast instead of buffering.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 1GB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a header fails validation. The stream is unusable
    /// afterwards since frame boundaries are lost.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    let header = match Header::decode(&self.buffer) {
                        Some(header) => header,
                        None => return Ok(None),
                    };
                    header.validate(self.max_payload_size)?;

                    let _ = self.buffer.split_to(HEADER_SIZE);

                    if header.payload_length == 0 {
                        return Ok(Some(Frame::new(header, Bytes::new())));
                    }

                    self.state = State::WaitingForPayload {
                        header,
                        remaining: header.payload_length,
                    };
                }

                State::WaitingForPayload { header, remaining } => {
                    let remaining = *remaining as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    let header = *header;
                    self.state = State::WaitingForHeader;

                    return Ok(Some(Frame::new(header, payload)));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, flags, MessageKind};

    fn make_frame_bytes(kind: MessageKind, frame_flags: u8, id: u64, payload: &[u8]) -> Vec<u8> {
        let header = Header::new(kind, frame_flags, id, payload.len() as u32);
        build_frame(&header, payload)
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_frame_bytes(MessageKind::ResponseBody, 0, 42, b"hello");

        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), 42);
        assert_eq!(frames[0].payload(), b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        combined.extend(make_frame_bytes(MessageKind::RequestBody, 0, 1, b"first"));
        combined.extend(make_frame_bytes(MessageKind::RequestBody, 0, 2, b"second"));
        combined.extend(make_frame_bytes(
            MessageKind::RequestBody,
            flags::END_OF_BODY,
            1,
            b"",
        ));

        let frames = buffer.push(&combined).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload(), b"first");
        assert_eq!(frames[1].payload(), b"second");
        assert!(frames[2].header.is_end_of_body());
    }

    #[test]
    fn test_fragmented_header_and_payload() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_frame_bytes(MessageKind::ResponseBody, 0, 7, b"fragmented payload");

        assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        assert!(buffer.push(&bytes[5..HEADER_SIZE + 3]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[HEADER_SIZE + 3..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"fragmented payload");
        assert_eq!(buffer.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_byte_by_byte() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_frame_bytes(MessageKind::RunnerControl, 0, 0, b"xyz");

        let mut frames = Vec::new();
        for b in &bytes {
            frames.extend(buffer.push(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"xyz");
    }

    #[test]
    fn test_payload_too_large() {
        let mut buffer = FrameBuffer::with_max_payload(4);
        let bytes = make_frame_bytes(MessageKind::RequestBody, 0, 1, b"too big");
        assert!(buffer.push(&bytes).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = make_frame_bytes(MessageKind::RequestBody, 0, 1, b"x");
        bytes[0] = 200;
        assert!(buffer.push(&bytes).is_err());
    }
}
