//! Fan-out of inbound messages to subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};
use crate::protocol::Message;

/// Inbound side of a channel end.
///
/// Messages published while nobody is subscribed are queued and handed to
/// the first subscriber, so a listener installed late still sees them.
pub(crate) struct Hub {
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    next_key: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<Message>>,
    backlog: VecDeque<Message>,
    closed: bool,
}

impl Hub {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a subscriber. After close the subscription ends immediately.
    pub(crate) fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();

        let key = state.next_key;
        state.next_key += 1;

        if !state.closed {
            while let Some(message) = state.backlog.pop_front() {
                let _ = tx.send(message);
            }
            state.subscribers.insert(key, tx);
        }

        Subscription {
            rx,
            hub: Arc::downgrade(self),
            key,
        }
    }

    /// Deliver a message to every subscriber.
    pub(crate) fn publish(&self, message: Message) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(BridgeError::ConnectionClosed);
        }

        if state.subscribers.is_empty() {
            state.backlog.push_back(message);
            return Ok(());
        }

        state
            .subscribers
            .retain(|_, tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    /// Close the hub, ending every subscription.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
        state.backlog.clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn unsubscribe(&self, key: u64) {
        self.lock().subscribers.remove(&key);
    }
}

/// A stream of inbound messages from one channel end.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Message>,
    hub: Weak<Hub>,
    key: u64,
}

impl Subscription {
    /// Receive the next message, `None` once the channel has closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel(id: u64) -> Message {
        Message::RequestCancel { id }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_message() {
        let hub = Hub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(cancel(1)).unwrap();
        hub.publish(cancel(2)).unwrap();

        assert_eq!(a.recv().await, Some(cancel(1)));
        assert_eq!(a.recv().await, Some(cancel(2)));
        assert_eq!(b.recv().await, Some(cancel(1)));
        assert_eq!(b.recv().await, Some(cancel(2)));
    }

    #[tokio::test]
    async fn test_backlog_goes_to_first_subscriber() {
        let hub = Hub::new();
        hub.publish(cancel(1)).unwrap();
        hub.publish(cancel(2)).unwrap();

        let mut sub = hub.subscribe();
        hub.publish(cancel(3)).unwrap();

        assert_eq!(sub.recv().await, Some(cancel(1)));
        assert_eq!(sub.recv().await, Some(cancel(2)));
        assert_eq!(sub.recv().await, Some(cancel(3)));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = Hub::new();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions_and_rejects_publish() {
        let hub = Hub::new();
        let mut sub = hub.subscribe();
        hub.close();

        assert!(hub.is_closed());
        assert_eq!(sub.recv().await, None);
        assert!(matches!(
            hub.publish(cancel(1)),
            Err(BridgeError::ConnectionClosed)
        ));

        let mut late = hub.subscribe();
        assert_eq!(late.recv().await, None);
    }
}
