//! Framed channel over a byte stream.
//!
//! Each [`Message`] travels as one frame (see [`crate::protocol`]). A reader
//! task reassembles frames and publishes the decoded messages; a dedicated
//! writer task batches outbound frames into vectored writes.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use super::{Channel, Hub, Subscription};
use crate::error::{BridgeError, Result};
use crate::protocol::{Frame, FrameBuffer, Message, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Default size of the reader's scratch buffer (64KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for a [`StreamChannel`].
#[derive(Debug, Clone)]
pub struct StreamChannelConfig {
    /// Largest accepted frame payload. Default: 1GB.
    pub max_payload_size: u32,
    /// Bytes requested from the stream per read. Default: 64KB.
    pub read_buffer_size: usize,
}

impl Default for StreamChannelConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// A channel end that exchanges frames over an `AsyncRead + AsyncWrite`.
///
/// Must be created inside a tokio runtime. The channel closes when the
/// stream reaches EOF, a read fails, or a frame header is invalid. Frames
/// with a valid header but an undecodable payload are logged and dropped.
///
/// Dropping the channel stops the reader; queued outbound frames are still
/// flushed before the write half shuts down.
pub struct StreamChannel {
    inbound: Arc<Hub>,
    writer: WriterHandle,
    reader_task: JoinHandle<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl StreamChannel {
    /// Wrap a bidirectional stream with the default configuration.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_config(stream, StreamChannelConfig::default())
    }

    /// Wrap a bidirectional stream.
    pub fn with_config<S>(stream: S, config: StreamChannelConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer, config)
    }

    /// Build a channel from separate read and write halves.
    pub fn from_split<R, W>(reader: R, writer: W, config: StreamChannelConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let inbound = Hub::new();
        let (writer, writer_task) = spawn_writer_task(writer);

        let hub = inbound.clone();
        let reader_task = tokio::spawn(async move {
            match read_loop(reader, &hub, &config).await {
                Ok(()) => tracing::debug!("Stream channel reached EOF"),
                Err(e) => tracing::warn!("Stream channel read loop stopped: {}", e),
            }
            hub.close();
        });

        Self {
            inbound,
            writer,
            reader_task,
            _writer_task: writer_task,
        }
    }

    /// Whether the inbound side has closed.
    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }

    /// Frames queued for writing but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.writer.pending_count()
    }
}

impl Channel for StreamChannel {
    fn send(&self, message: Message) -> Result<()> {
        if self.inbound.is_closed() {
            return Err(BridgeError::ConnectionClosed);
        }
        let frame = Frame::from_message(&message)?;
        self.writer.send(OutboundFrame::new(frame))
    }

    fn subscribe(&self) -> Subscription {
        self.inbound.subscribe()
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.inbound.close();
    }
}

/// Read frames until EOF and publish them to the hub.
async fn read_loop<R>(mut reader: R, hub: &Hub, config: &StreamChannelConfig) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_payload(config.max_payload_size);
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => return Err(BridgeError::Io(e)),
        };

        for frame in frame_buffer.push(&buf[..n])? {
            let kind = frame.header.kind;
            let id = frame.id();
            match frame.into_message() {
                Ok(message) => {
                    tracing::trace!("Received {} for id {}", message.kind(), id);
                    if hub.publish(message).is_err() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!("Dropping undecodable frame (kind {}, id {}): {}", kind, id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, BodyPart, Header, MessageKind};
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_messages_cross_the_stream() {
        let (a, b) = duplex(1024);
        let left = StreamChannel::new(a);
        let right = StreamChannel::new(b);
        let mut inbox = right.subscribe();

        let chunk = Message::RequestBody {
            id: 5,
            part: BodyPart::Chunk(Bytes::from_static(b"payload")),
        };
        left.send(chunk.clone()).unwrap();
        left.send(Message::RequestBody {
            id: 5,
            part: BodyPart::Done,
        })
        .unwrap();

        assert_eq!(inbox.recv().await, Some(chunk));
        assert_eq!(
            inbox.recv().await,
            Some(Message::RequestBody {
                id: 5,
                part: BodyPart::Done
            })
        );
    }

    #[tokio::test]
    async fn test_small_read_buffer_reassembles_frames() {
        let (a, b) = duplex(16);
        let left = StreamChannel::new(a);
        let right = StreamChannel::with_config(
            b,
            StreamChannelConfig {
                read_buffer_size: 3,
                ..Default::default()
            },
        );
        let mut inbox = right.subscribe();

        let big = Bytes::from(vec![7u8; 1000]);
        left.send(Message::ResponseBody {
            id: 1,
            part: BodyPart::Chunk(big.clone()),
        })
        .unwrap();

        assert_eq!(
            inbox.recv().await,
            Some(Message::ResponseBody {
                id: 1,
                part: BodyPart::Chunk(big)
            })
        );
    }

    #[tokio::test]
    async fn test_eof_closes_channel() {
        let (a, b) = duplex(1024);
        let channel = StreamChannel::new(a);
        let mut inbox = channel.subscribe();

        drop(b);

        assert_eq!(inbox.recv().await, None);
        assert!(channel.is_closed());
        assert!(matches!(
            channel.send(Message::RequestCancel { id: 1 }),
            Err(BridgeError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_invalid_header_closes_channel() {
        let (a, mut b) = duplex(1024);
        let channel = StreamChannel::new(a);
        let mut inbox = channel.subscribe();

        let mut bytes = build_frame(&Header::new(MessageKind::RequestBody, 0, 1, 1), b"x");
        bytes[1] = 0x80;
        b.write_all(&bytes).await.unwrap();

        assert_eq!(inbox.recv().await, None);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped() {
        let (a, mut b) = duplex(1024);
        let channel = StreamChannel::new(a);
        let mut inbox = channel.subscribe();

        let bad = build_frame(&Header::new(MessageKind::ResponseOpen, 0, 1, 3), b"bad");
        let good = build_frame(&Header::new(MessageKind::ResponseCancel, 0, 2, 0), b"");
        b.write_all(&bad).await.unwrap();
        b.write_all(&good).await.unwrap();

        assert_eq!(inbox.recv().await, Some(Message::ResponseCancel { id: 2 }));
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_channel() {
        let (a, mut b) = duplex(1024);
        let channel = StreamChannel::with_config(
            a,
            StreamChannelConfig {
                max_payload_size: 4,
                ..Default::default()
            },
        );
        let mut inbox = channel.subscribe();

        let bytes = build_frame(&Header::new(MessageKind::RequestBody, 0, 1, 8), b"12345678");
        b.write_all(&bytes).await.unwrap();

        assert_eq!(inbox.recv().await, None);
    }
}
