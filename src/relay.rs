//! In-process publish/subscribe relay.
//!
//! Delivery is synchronous: [`Relay::publish`] invokes every current
//! subscriber of the message's topic on the caller's thread before it
//! returns. The subscriber table lock is released before handlers run, so
//! a handler may itself publish or (un)subscribe.
//!
//! ```text
//!  ControlService ──Command──▶ ┌───────┐ ──Command──▶ DeviceSession
//!                ◀─PlcState── │ Relay │ ◀─PlcState──
//!  LogEventSink  ◀──(all)──── └───────┘
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::app::events::{Message, Topic};

/// Callback invoked for each delivered message.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Opaque subscription handle returned by [`Relay::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    topic: Topic,
    handler: Handler,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Cheaply cloneable handle to a shared relay.
#[derive(Clone, Default)]
pub struct Relay {
    table: Arc<Mutex<Table>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let mut table = self.table.lock();
        table.next_id += 1;
        let id = SubscriptionId(table.next_id);
        table.subscribers.push(Subscriber {
            id,
            topic,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.table.lock();
        let before = table.subscribers.len();
        table.subscribers.retain(|s| s.id != id);
        table.subscribers.len() != before
    }

    /// Deliver `message` to every subscriber of its topic.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, message: Message) -> usize {
        let topic = message.topic();
        let handlers: Vec<Handler> = self
            .table
            .lock()
            .subscribers
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in &handlers {
            handler(&message);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.table
            .lock()
            .subscribers
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn publish_reaches_only_matching_topic() {
        let relay = Relay::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        relay.subscribe(Topic::Shutdown, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(relay.publish(Message::LinkStatus { ready: true }), 0);
        assert_eq!(relay.publish(Message::Shutdown), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let relay = Relay::new();
        let id = relay.subscribe(Topic::Shutdown, |_| {});
        assert_eq!(relay.subscriber_count(Topic::Shutdown), 1);
        assert!(relay.unsubscribe(id));
        assert!(!relay.unsubscribe(id));
        assert_eq!(relay.publish(Message::Shutdown), 0);
    }

    #[test]
    fn handlers_may_publish_reentrantly() {
        let relay = Relay::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let inner = relay.clone();
        relay.subscribe(Topic::LinkStatus, move |_| {
            inner.publish(Message::Shutdown);
        });
        let s = Arc::clone(&seen);
        relay.subscribe(Topic::Shutdown, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        relay.publish(Message::LinkStatus { ready: false });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
