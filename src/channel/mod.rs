//! Channel abstraction - an ordered, bidirectional message transport.
//!
//! A [`Channel`] end can `send` messages to its peer and hand out any number
//! of [`Subscription`]s, each of which sees every inbound message in order.
//!
//! Implementations:
//! - [`MemoryChannel`] - two connected ends in the same process
//! - [`StreamChannel`] - framed messages over a byte stream (pipe, socket)

mod hub;
mod memory;
mod stream;

use std::sync::Arc;

use bytes::Bytes;

pub(crate) use hub::Hub;
pub use hub::Subscription;
pub use memory::MemoryChannel;
pub use stream::{StreamChannel, StreamChannelConfig, DEFAULT_READ_BUFFER_SIZE};

use crate::error::Result;
use crate::protocol::Message;

/// Callback receiving `runner-control` payloads.
///
/// Runs on the demultiplexing task, so it must not block.
pub type ControlCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// One end of an ordered, bidirectional message transport.
///
/// `send` never waits: it either enqueues the message or fails because the
/// channel has closed. Messages sent from one end arrive at the other end in
/// send order.
pub trait Channel: Send + Sync + 'static {
    /// Send a message to the peer.
    fn send(&self, message: Message) -> Result<()>;

    /// Subscribe to inbound messages.
    ///
    /// Dropping the subscription unsubscribes.
    fn subscribe(&self) -> Subscription;
}

impl<C: Channel + ?Sized> Channel for Arc<C> {
    fn send(&self, message: Message) -> Result<()> {
        (**self).send(message)
    }

    fn subscribe(&self) -> Subscription {
        (**self).subscribe()
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&self, message: Message) -> Result<()> {
        (**self).send(message)
    }

    fn subscribe(&self) -> Subscription {
        (**self).subscribe()
    }
}
