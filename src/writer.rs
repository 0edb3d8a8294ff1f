//! Dedicated writer task for framed channels.
//!
//! Senders enqueue encoded frames on an unbounded mpsc queue and return
//! immediately; one task drains the queue and writes batches with
//! scatter/gather I/O.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher / pumps ─┐
//! Server / handlers  ─┼─► mpsc::UnboundedSender<OutboundFrame> ─► Writer Task ─► Pipe
//! Control messages   ─┘
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::protocol::{Frame, HEADER_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the pipe.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    /// Pre-encoded header.
    header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for end-of-body and cancel frames).
    payload: Bytes,
}

impl OutboundFrame {
    #[inline]
    pub(crate) fn new(frame: Frame) -> Self {
        Self {
            header: frame.header.encode(),
            payload: frame.payload,
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    /// Frames queued but not yet written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a frame. Fails only once the writer task has stopped.
    pub(crate) fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            BridgeError::ConnectionClosed
        })
    }

    /// Frames queued but not yet written.
    #[inline]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly when every handle is dropped, or with an error
/// when a write fails.
pub(crate) fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Main writer loop - receives frames and writes them in batches.
async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let written = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        batch.clear();
        pending.fetch_sub(written, Ordering::Release);

        if let Err(e) = result {
            tracing::warn!("Writer task stopping: {}", e);
            return Err(e);
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BodyPart, FrameBuffer, Message};
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn chunk_frame(id: u64, data: &'static [u8]) -> OutboundFrame {
        let msg = Message::ResponseBody {
            id,
            part: BodyPart::Chunk(Bytes::from_static(data)),
        };
        OutboundFrame::new(Frame::from_message(&msg).unwrap())
    }

    #[test]
    fn test_remaining_slices_no_skip() {
        let batch = vec![chunk_frame(1, b"hello")];
        let slices = remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_remaining_slices_partial_header() {
        let batch = vec![chunk_frame(1, b"hello")];
        let slices = remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 5);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_remaining_slices_skips_whole_frames() {
        let batch = vec![chunk_frame(1, b"abc"), chunk_frame(2, b"defg")];
        let slices = remaining_slices(&batch, HEADER_SIZE + 3 + 2);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 2);
        assert_eq!(slices[1].len(), 4);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|i| chunk_frame(i, b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), 5 * (HEADER_SIZE + 3));

        let frames = FrameBuffer::new().push(&written).unwrap();
        let ids: Vec<u64> = frames.iter().map(Frame::id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_writer_preserves_send_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, task) = spawn_writer_task(client);

        for i in 0..10u64 {
            handle.send(chunk_frame(i, b"data")).unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.unwrap();
        let frames = FrameBuffer::new().push(&bytes).unwrap();
        let ids: Vec<u64> = frames.iter().map(Frame::id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_send_after_writer_stopped() {
        let (client, _server) = duplex(1024);
        let (handle, task) = spawn_writer_task(client);
        task.abort();
        let _ = task.await;

        let result = handle.send(chunk_frame(1, b"x"));
        assert!(matches!(result, Err(BridgeError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
    }
}
