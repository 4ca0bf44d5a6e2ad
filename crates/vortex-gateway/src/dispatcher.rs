use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use vortex_types::{ChangeEvent, ChangeFilter};

const CHANNEL_CAPACITY: usize = 1024;

/// Fans row-level change events out to every live subscription.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every subscriber sees every event; filtering happens on the receiving side.
    broadcast_tx: broadcast::Sender<ChangeEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Dispatcher that holds at most `capacity` undelivered events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to events matching `filter`.
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        debug!("New subscription on {}", filter.table);
        Subscription::new(filter, self.inner.broadcast_tx.subscribe())
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: ChangeEvent) {
        // No receivers is not an error: nobody is watching that table right now.
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Number of subscriptions that have not been dropped yet.
    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

/// One item of a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Change(ChangeEvent),
    /// The subscriber fell behind and this many events were dropped, matching
    /// or not. Anything derived from the feed must be refetched.
    Missed(u64),
}

/// A live change feed. Dropping it (or calling [`Subscription::unsubscribe`])
/// stops delivery immediately.
pub struct Subscription {
    filter: ChangeFilter,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(filter: ChangeFilter, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { filter, rx }
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Next matching event or gap, or `None` once the backend has shut down.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(Delivery::Change(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!("Subscription on {} lagged by {} events", self.filter.table, n);
                    return Some(Delivery::Missed(n));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        debug!("Subscription on {} released", self.filter.table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;
    use vortex_types::{ChangeOp, Table};

    fn event(table: Table, chat_id: Uuid) -> ChangeEvent {
        let row = json!({ "id": Uuid::new_v4(), "chat_id": chat_id })
            .as_object()
            .cloned()
            .unwrap();
        ChangeEvent::new(table, ChangeOp::Insert, row)
    }

    #[tokio::test]
    async fn test_subscription_skips_unmatched_events() {
        let dispatcher = Dispatcher::new();
        let chat_id = Uuid::new_v4();
        let mut sub =
            dispatcher.subscribe(ChangeFilter::table(Table::Messages).with_eq("chat_id", chat_id));

        dispatcher.publish(event(Table::Profiles, chat_id));
        dispatcher.publish(event(Table::Messages, Uuid::new_v4()));
        let wanted = event(Table::Messages, chat_id);
        dispatcher.publish(wanted.clone());

        assert_eq!(sub.next().await, Some(Delivery::Change(wanted)));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_about_the_gap() {
        let dispatcher = Dispatcher::with_capacity(4);
        let chat_id = Uuid::new_v4();
        let mut sub = dispatcher.subscribe(ChangeFilter::table(Table::Messages));

        let events: Vec<ChangeEvent> = (0..6).map(|_| event(Table::Messages, chat_id)).collect();
        for event in &events {
            dispatcher.publish(event.clone());
        }

        assert_eq!(sub.next().await, Some(Delivery::Missed(2)));
        assert_eq!(sub.next().await, Some(Delivery::Change(events[2].clone())));
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_receiver() {
        let dispatcher = Dispatcher::new();
        let first = dispatcher.subscribe(ChangeFilter::table(Table::Messages));
        let second = dispatcher.subscribe(ChangeFilter::table(Table::Messages));
        assert_eq!(dispatcher.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);
        drop(second);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_next_ends_when_backend_shuts_down() {
        let dispatcher = Dispatcher::new();
        let mut sub = dispatcher.subscribe(ChangeFilter::table(Table::Messages));
        drop(dispatcher);
        assert_eq!(sub.next().await, None);
    }
}
