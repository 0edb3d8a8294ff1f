//! Frame struct and the mapping between [`Message`] and frames.
//!
//! Body chunks travel as raw payload bytes, open and error messages as
//! MsgPack maps, control messages as opaque bytes and cancel messages with
//! an empty payload.
//!
//! # Example
//!
//! ```
//! use worker_fetch::protocol::{BodyPart, Frame, Message};
//! use bytes::Bytes;
//!
//! let msg = Message::ResponseBody { id: 7, part: BodyPart::Chunk(Bytes::from_static(b"hi")) };
//! let frame = Frame::from_message(&msg).unwrap();
//! assert_eq!(frame.payload(), b"hi");
//! assert_eq!(frame.into_message().unwrap(), msg);
//! ```

use bytes::Bytes;

use super::message::{BodyPart, ErrorPayload, Message, MessageKind};
use super::wire_format::{flags, Header, HEADER_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::{BridgeError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the correlation id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.header.id
    }

    /// Encode a message into a frame.
    pub fn from_message(message: &Message) -> Result<Self> {
        let kind = message.kind();
        let id = message.id().unwrap_or(0);

        let (frame_flags, payload) = match message {
            Message::RequestOpen { head, .. } => (0, Bytes::from(MsgPackCodec::encode(head)?)),
            Message::ResponseOpen { head, .. } => (0, Bytes::from(MsgPackCodec::encode(head)?)),
            Message::RequestBody { part, .. } | Message::ResponseBody { part, .. } => match part {
                BodyPart::Chunk(chunk) => (0, chunk.clone()),
                BodyPart::Done => (flags::END_OF_BODY, Bytes::new()),
            },
            Message::RequestError { error, .. } | Message::ResponseError { error, .. } => {
                (0, Bytes::from(MsgPackCodec::encode(error)?))
            }
            Message::RequestCancel { .. } | Message::ResponseCancel { .. } => (0, Bytes::new()),
            Message::RunnerControl { payload } => (0, payload.clone()),
        };

        let length = u32::try_from(payload.len()).map_err(|_| {
            BridgeError::Protocol(format!("Payload of {} bytes is too large", payload.len()))
        })?;

        Ok(Self::new(Header::new(kind, frame_flags, id, length), payload))
    }

    /// Decode this frame back into a message.
    pub fn into_message(self) -> Result<Message> {
        let Frame { header, payload } = self;
        let kind = header.message_kind().ok_or_else(|| {
            BridgeError::Protocol(format!("Unknown message kind {}", header.kind))
        })?;
        let id = header.id;

        let part = |payload: Bytes| {
            if header.is_end_of_body() {
                BodyPart::Done
            } else {
                BodyPart::Chunk(payload)
            }
        };

        Ok(match kind {
            MessageKind::RequestOpen => Message::RequestOpen {
                id,
                head: MsgPackCodec::decode(&payload)?,
            },
            MessageKind::RequestBody => Message::RequestBody {
                id,
                part: part(payload),
            },
            MessageKind::RequestError => Message::RequestError {
                id,
                error: MsgPackCodec::decode::<ErrorPayload>(&payload)?,
            },
            MessageKind::RequestCancel => Message::RequestCancel { id },
            MessageKind::ResponseOpen => Message::ResponseOpen {
                id,
                head: MsgPackCodec::decode(&payload)?,
            },
            MessageKind::ResponseBody => Message::ResponseBody {
                id,
                part: part(payload),
            },
            MessageKind::ResponseError => Message::ResponseError {
                id,
                error: MsgPackCodec::decode::<ErrorPayload>(&payload)?,
            },
            MessageKind::ResponseCancel => Message::ResponseCancel { id },
            MessageKind::RunnerControl => Message::RunnerControl { payload },
        })
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends payload into a contiguous buffer.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
