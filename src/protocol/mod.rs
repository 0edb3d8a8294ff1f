//! Protocol module - message shapes, wire format and framing.
//!
//! - [`Message`] - the vocabulary shared by dispatcher and server
//! - 14-byte frame header encoding/decoding
//! - Frame buffer for accumulating partial reads from byte streams

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{
    BodyPart, ErrorPayload, ExtraFields, Message, MessageKind, RequestHead, RequestId,
    ResponseHead,
};
pub use wire_format::{
    flags, Header, ABSOLUTE_MAX_PAYLOAD_SIZE, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE,
    RESERVED_KIND,
};
