//! In-process channel between two tasks.

use std::sync::Arc;

use super::{Channel, Hub, Subscription};
use crate::error::Result;
use crate::protocol::Message;

/// One end of an in-process channel pair.
///
/// Cloning yields another handle to the same end.
///
/// # Example
///
/// ```
/// use worker_fetch::channel::{Channel, MemoryChannel};
/// use worker_fetch::protocol::Message;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (caller, worker) = MemoryChannel::pair();
/// let mut inbox = worker.subscribe();
///
/// caller.send(Message::RequestCancel { id: 1 }).unwrap();
/// assert_eq!(inbox.recv().await, Some(Message::RequestCancel { id: 1 }));
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryChannel {
    inbound: Arc<Hub>,
    outbound: Arc<Hub>,
}

impl MemoryChannel {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let a = Hub::new();
        let b = Hub::new();
        (
            Self {
                inbound: a.clone(),
                outbound: b.clone(),
            },
            Self {
                inbound: b,
                outbound: a,
            },
        )
    }

    /// Close both directions.
    ///
    /// Every subscription on either end ends and later sends fail.
    pub fn close(&self) {
        self.inbound.close();
        self.outbound.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }
}

impl Channel for MemoryChannel {
    fn send(&self, message: Message) -> Result<()> {
        self.outbound.publish(message)
    }

    fn subscribe(&self) -> Subscription {
        self.inbound.subscribe()
    }
}
