//! Message shapes exchanged on a [`Channel`](crate::channel::Channel).
//!
//! Every message except `runner-control` carries the correlation id of the
//! transfer it belongs to. Requests flow dispatcher → server, responses flow
//! server → dispatcher.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, Side};
use crate::http::Headers;

/// Correlation id, unique per channel while the transfer is pending.
pub type RequestId = u64;

/// Opaque fields merged into a `request-open` message.
pub type ExtraFields = serde_json::Map<String, serde_json::Value>;

/// Discriminant of a [`Message`], mirrored as the kind byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Begin a request.
    RequestOpen = 1,
    /// One request body chunk or the end-of-body marker.
    RequestBody = 2,
    /// Request body production failed.
    RequestError = 3,
    /// The caller abandoned the transfer.
    RequestCancel = 4,
    /// Response metadata.
    ResponseOpen = 5,
    /// One response body chunk or the end-of-body marker.
    ResponseBody = 6,
    /// Handler or response body production failed.
    ResponseError = 7,
    /// The server stopped consuming the request body.
    ResponseCancel = 8,
    /// Out-of-band payload for the module loading subsystem.
    RunnerControl = 9,
}

impl MessageKind {
    /// Convert a kind byte back to a kind.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::RequestOpen,
            2 => Self::RequestBody,
            3 => Self::RequestError,
            4 => Self::RequestCancel,
            5 => Self::ResponseOpen,
            6 => Self::ResponseBody,
            7 => Self::ResponseError,
            8 => Self::ResponseCancel,
            9 => Self::RunnerControl,
            _ => return None,
        })
    }

    /// The `type` tag of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestOpen => "request-open",
            Self::RequestBody => "request-body",
            Self::RequestError => "request-error",
            Self::RequestCancel => "request-cancel",
            Self::ResponseOpen => "response-open",
            Self::ResponseBody => "response-body",
            Self::ResponseError => "response-error",
            Self::ResponseCancel => "response-cancel",
            Self::RunnerControl => "runner-control",
        }
    }

    /// Whether this kind carries body chunks.
    #[inline]
    pub fn is_body(&self) -> bool {
        matches!(self, Self::RequestBody | Self::ResponseBody)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request metadata carried by `request-open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHead {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    /// Whether `request-body` messages follow.
    pub has_body: bool,
    /// Routing key selecting which handler runs the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Collaborator-supplied fields, passed through uninterpreted.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: ExtraFields,
}

/// Response metadata carried by `response-open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseHead {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    /// Whether `response-body` messages follow.
    pub has_body: bool,
}

/// Error rendering carried by `*-error` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

impl ErrorPayload {
    /// Create a payload from a message and an optional stack.
    pub fn new(message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            message: message.into(),
            stack,
        }
    }

    /// Render a local error for transport.
    ///
    /// Errors that already came from the peer keep their stack; other errors
    /// use their `source()` chain as the stack.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(remote) = find_remote(err) {
            return Self::new(remote.message.clone(), remote.stack.clone());
        }

        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        let stack = if causes.is_empty() {
            None
        } else {
            Some(causes.join("\n"))
        };
        Self::new(err.to_string(), stack)
    }

    /// Rebuild a local error value on the receiving side.
    pub fn into_remote(self, origin: Side) -> RemoteError {
        RemoteError::new(self.message, self.stack, origin)
    }
}

fn find_remote<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a RemoteError> {
    if let Some(remote) = err.downcast_ref::<RemoteError>() {
        return Some(remote);
    }
    match err.downcast_ref::<crate::error::BridgeError>() {
        Some(crate::error::BridgeError::Remote(remote)) => Some(remote),
        _ => None,
    }
}

/// One body chunk, or the end-of-body marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyPart {
    Chunk(Bytes),
    Done,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RequestOpen { id: RequestId, head: RequestHead },
    RequestBody { id: RequestId, part: BodyPart },
    RequestError { id: RequestId, error: ErrorPayload },
    RequestCancel { id: RequestId },
    ResponseOpen { id: RequestId, head: ResponseHead },
    ResponseBody { id: RequestId, part: BodyPart },
    ResponseError { id: RequestId, error: ErrorPayload },
    ResponseCancel { id: RequestId },
    RunnerControl { payload: Bytes },
}

impl Message {
    /// The kind (`type` tag) of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::RequestOpen { .. } => MessageKind::RequestOpen,
            Message::RequestBody { .. } => MessageKind::RequestBody,
            Message::RequestError { .. } => MessageKind::RequestError,
            Message::RequestCancel { .. } => MessageKind::RequestCancel,
            Message::ResponseOpen { .. } => MessageKind::ResponseOpen,
            Message::ResponseBody { .. } => MessageKind::ResponseBody,
            Message::ResponseError { .. } => MessageKind::ResponseError,
            Message::ResponseCancel { .. } => MessageKind::ResponseCancel,
            Message::RunnerControl { .. } => MessageKind::RunnerControl,
        }
    }

    /// The correlation id, or `None` for `runner-control`.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Message::RequestOpen { id, .. }
            | Message::RequestBody { id, .. }
            | Message::RequestError { id, .. }
            | Message::RequestCancel { id }
            | Message::ResponseOpen { id, .. }
            | Message::ResponseBody { id, .. }
            | Message::ResponseError { id, .. }
            | Message::ResponseCancel { id } => Some(*id),
            Message::RunnerControl { .. } => None,
        }
    }
}
