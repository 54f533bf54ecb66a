use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::types::BusEvent;

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Identifier returned by [`EventBus::subscribe`], usable to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Topic-keyed publish/subscribe dispatcher.
///
/// `publish` invokes every handler currently registered for the exact topic
/// string, synchronously and in registration order. Handlers are cloned out
/// of the registry before dispatch, so a handler may subscribe or unsubscribe
/// re-entrantly; such changes take effect from the next publish. Handlers
/// must not block: anything that can wait on I/O belongs on a channel to a
/// task, not in the handler.
#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every future publish on `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was still registered. An event
    /// already being dispatched may still reach the handler once.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        match topics.get_mut(topic) {
            Some(handlers) => {
                let before = handlers.len();
                handlers.retain(|(handler_id, _)| *handler_id != id);
                before != handlers.len()
            }
            None => false,
        }
    }

    /// Publish to every current subscriber of `topic`, in registration order.
    /// A topic with no subscribers is a no-op. Returns the number of handlers
    /// invoked.
    pub fn publish(&self, topic: &str, event: &BusEvent) -> usize {
        let handlers: Vec<Handler> = {
            let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
            match topics.get(topic) {
                Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
                None => return 0,
            }
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of handlers currently registered for `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }
}
