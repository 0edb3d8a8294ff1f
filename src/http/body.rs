//! Streaming bodies.
//!
//! A [`Body`] is a pull-based stream of byte chunks. Bodies received over a
//! channel are fed by a [`BodySender`] as messages arrive; the sender is the
//! only producer and it can deliver at most one terminal event: dropping it
//! closes the body, [`BodySender::fail`] errors it.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};

type ChunkResult = Result<Bytes>;

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Stream(BoxStream<'static, ChunkResult>),
    Channel(mpsc::UnboundedReceiver<ChunkResult>),
}

/// A request or response body.
pub struct Body {
    kind: Kind,
}

impl Body {
    /// A body that ends immediately.
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    /// A body consisting of a single buffer.
    ///
    /// An empty buffer yields no chunks.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            Self::empty()
        } else {
            Self {
                kind: Kind::Full(Some(bytes)),
            }
        }
    }

    /// A body read from a caller-supplied stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            kind: Kind::Stream(stream.boxed()),
        }
    }

    /// A body fed incrementally through the returned sender.
    pub fn channel() -> (BodySender, Body) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BodySender { tx },
            Body {
                kind: Kind::Channel(rx),
            },
        )
    }

    /// Read the next chunk, `None` once the body has ended.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.next().await
    }

    /// Drain the whole body into one buffer.
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Drain the whole body as UTF-8 text.
    pub async fn text(self) -> Result<String> {
        let bytes = self.collect().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BridgeError::Protocol(format!("Body is not valid UTF-8: {}", e)))
    }
}

impl Stream for Body {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Full(bytes) => Poll::Ready(bytes.take().map(Ok)),
            Kind::Stream(stream) => stream.poll_next_unpin(cx),
            Kind::Channel(rx) => rx.poll_recv(cx),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Empty => "empty",
            Kind::Full(_) => "full",
            Kind::Stream(_) => "stream",
            Kind::Channel(_) => "channel",
        };
        f.debug_struct("Body").field("kind", &kind).finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(bytes))
    }
}

/// Producer half of a channel-fed [`Body`].
#[derive(Debug)]
pub struct BodySender {
    tx: mpsc::UnboundedSender<ChunkResult>,
}

impl BodySender {
    /// Enqueue a chunk.
    ///
    /// Returns `false` if the body has been dropped by its reader.
    pub fn send_chunk(&self, chunk: Bytes) -> bool {
        self.tx.send(Ok(chunk)).is_ok()
    }

    /// Terminate the body with an error.
    ///
    /// Returns `false` if the body has been dropped by its reader.
    pub fn fail(self, err: BridgeError) -> bool {
        self.tx.send(Err(err)).is_ok()
    }

    /// Whether the reader has dropped the body.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
