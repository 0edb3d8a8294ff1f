//! Wire format encoding and decoding.
//!
//! Implements the 14-byte frame header used by byte-stream channels:
//! ```text
//! ┌───────┬───────┬──────────┬──────────┐
//! │ Kind  │ Flags │ Id       │ Length   │
//! │ 1 byte│ 1 byte│ 8 bytes  │ 4 bytes  │
//! │       │       │ uint64 BE│ uint32 BE│
//! └───────┴───────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{BridgeError, Result};

use super::message::MessageKind;

/// Header size in bytes (fixed, exactly 14).
pub const HEADER_SIZE: usize = 14;

/// Default maximum payload size (1 GB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Absolute maximum payload size (~2 GB, max i32).
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = 2_147_483_647;

/// Reserved kind byte (never sent).
pub const RESERVED_KIND: u8 = 0;

/// Flag constants for the protocol.
pub mod flags {
    /// End-of-body marker on `request-body` / `response-body` frames.
    pub const END_OF_BODY: u8 = 0b0000_0001;

    /// Reserved bits mask (bits 1-7).
    pub const RESERVED_MASK: u8 = 0b1111_1110;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message kind byte (see [`MessageKind`]).
    pub kind: u8,
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Correlation id (0 for `runner-control`).
    pub id: u64,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(kind: MessageKind, flags: u8, id: u64, payload_length: u32) -> Self {
        Self {
            kind: kind as u8,
            flags,
            id,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use worker_fetch::protocol::{Header, MessageKind, HEADER_SIZE};
    ///
    /// let header = Header::new(MessageKind::ResponseBody, 0, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (14 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = self.kind;
        buf[1] = self.flags;
        buf[2..10].copy_from_slice(&self.id.to_be_bytes());
        buf[10..14].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[2..10]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&buf[10..14]);
        Some(Self {
            kind: buf[0],
            flags: buf[1],
            id: u64::from_be_bytes(id),
            payload_length: u32::from_be_bytes(length),
        })
    }

    /// The message kind, if the kind byte is known.
    #[inline]
    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::from_u8(self.kind)
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Kind is known and not reserved
    /// - Payload length doesn't exceed max
    /// - Reserved flag bits are 0
    /// - End-of-body only appears on body frames, with an empty payload
    pub fn validate(&self, max_payload_size: u32) -> Result<MessageKind> {
        let kind = self.message_kind().ok_or_else(|| {
            BridgeError::Protocol(format!("Unknown message kind {}", self.kind))
        })?;

        if self.payload_length > max_payload_size {
            return Err(BridgeError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(BridgeError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        if self.is_end_of_body() {
            if !kind.is_body() {
                return Err(BridgeError::Protocol(format!(
                    "End-of-body flag set on {} frame",
                    kind
                )));
            }
            if self.payload_length != 0 {
                return Err(BridgeError::Protocol(
                    "End-of-body frame must have an empty payload".to_string(),
                ));
            }
        }

        Ok(kind)
    }

    /// Check if this frame marks the end of a body.
    #[inline]
    pub fn is_end_of_body(&self) -> bool {
        flags::has_flag(self.flags, flags::END_OF_BODY)
    }
}
