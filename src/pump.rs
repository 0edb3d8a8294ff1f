//! Body pump: drain a [`Body`] into ordered chunk messages.
//!
//! Chunks are read one at a time and sent in source order. Exactly one
//! terminal message follows: end-of-body on exhaustion, or an `*-error`
//! message if the body fails. A cancelled pump sends nothing further; the
//! side that cancelled it owns the terminal state of the transfer.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::error::BridgeError;
use crate::http::Body;
use crate::protocol::{BodyPart, ErrorPayload, Message, RequestId};

/// Which body a pump is draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDirection {
    /// Dispatcher → server, as `request-body` / `request-error`.
    Request,
    /// Server → dispatcher, as `response-body` / `response-error`.
    Response,
}

impl BodyDirection {
    fn body(self, id: RequestId, part: BodyPart) -> Message {
        match self {
            BodyDirection::Request => Message::RequestBody { id, part },
            BodyDirection::Response => Message::ResponseBody { id, part },
        }
    }

    fn chunk(self, id: RequestId, chunk: Bytes) -> Message {
        self.body(id, BodyPart::Chunk(chunk))
    }

    fn done(self, id: RequestId) -> Message {
        self.body(id, BodyPart::Done)
    }

    fn error(self, id: RequestId, error: ErrorPayload) -> Message {
        match self {
            BodyDirection::Request => Message::RequestError { id, error },
            BodyDirection::Response => Message::ResponseError { id, error },
        }
    }
}

/// How a pump ended.
#[derive(Debug)]
pub enum PumpOutcome {
    /// Every chunk and the end-of-body marker were sent.
    Completed,
    /// The body failed; an `*-error` message was sent in place of end-of-body.
    Failed(BridgeError),
    /// The cancellation token fired before the body ended.
    Cancelled,
    /// The channel refused a message.
    ChannelClosed,
}

/// Drain `body` into `channel` as messages for `id`.
///
/// The body is dropped before this returns, whatever the outcome.
pub async fn pump_body<C>(
    channel: &C,
    id: RequestId,
    direction: BodyDirection,
    mut body: Body,
    cancel: &CancellationToken,
) -> PumpOutcome
where
    C: Channel + ?Sized,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpOutcome::Cancelled,
            next = body.next_chunk() => next,
        };

        let (message, outcome) = match next {
            Some(Ok(chunk)) => {
                if channel.send(direction.chunk(id, chunk)).is_err() {
                    return PumpOutcome::ChannelClosed;
                }
                continue;
            }
            Some(Err(e)) => {
                tracing::debug!("{:?} body for id {} failed: {}", direction, id, e);
                (
                    direction.error(id, ErrorPayload::from_error(&e)),
                    PumpOutcome::Failed(e),
                )
            }
            None => (direction.done(id), PumpOutcome::Completed),
        };

        drop(body);
        return match channel.send(message) {
            Ok(()) => outcome,
            Err(_) => PumpOutcome::ChannelClosed,
        };
    }
}
