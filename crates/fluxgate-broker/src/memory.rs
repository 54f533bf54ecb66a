//! In-process broker.
//!
//! Same delivery semantics as the Redis implementation, backed by channels.
//! Used by the test suites and for running the coordinator without a broker.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::{Broker, Consumer};

/// In-memory [`Broker`].
#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    exchanges: HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    queues: HashMap<String, QueueSlot>,
}

/// A queue buffers from creation; the receiving half is handed to the first
/// (and only) consumer.
struct QueueSlot {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl QueueSlot {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish_fanout(&self, exchange: &str, payload: Vec<u8>) -> Result<()> {
        let mut inner = self.lock();
        if let Some(subscribers) = inner.exchanges.get_mut(exchange) {
            subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn publish_queue(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let mut inner = self.lock();
        let slot = inner
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueSlot::new);
        slot.tx.send(payload).map_err(|_| Error::Publish {
            target: queue.to_string(),
            message: "consumer gone".to_string(),
        })
    }

    async fn subscribe_fanout(&self, exchange: &str) -> Result<Consumer> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .exchanges
            .entry(exchange.to_string())
            .or_default()
            .push(tx);
        Ok(Consumer::new(rx))
    }

    async fn consume_queue(&self, queue: &str) -> Result<Consumer> {
        let mut inner = self.lock();
        let slot = inner
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueSlot::new);
        match slot.rx.take() {
            Some(rx) => Ok(Consumer::new(rx)),
            None => Err(Error::Subscribe {
                target: queue.to_string(),
                message: "queue already has a consumer".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fanout_reaches_every_bound_subscriber() {
        let broker = MemoryBroker::new();
        let mut a = broker.subscribe_fanout("ex").await.unwrap();
        let mut b = broker.subscribe_fanout("ex").await.unwrap();

        broker.publish_fanout("ex", b"hello".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), b"hello");
        assert_eq!(b.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn fanout_publish_before_bind_is_lost() {
        let broker = MemoryBroker::new();
        broker.publish_fanout("ex", b"early".to_vec()).await.unwrap();

        let mut late = broker.subscribe_fanout("ex").await.unwrap();
        broker.publish_fanout("ex", b"late".to_vec()).await.unwrap();

        assert_eq!(late.recv().await.unwrap(), b"late");
    }

    #[tokio::test]
    async fn queue_buffers_until_consumed() {
        let broker = MemoryBroker::new();
        broker.publish_queue("q", b"one".to_vec()).await.unwrap();
        broker.publish_queue("q", b"two".to_vec()).await.unwrap();

        let mut consumer = broker.consume_queue("q").await.unwrap();
        assert_eq!(consumer.recv().await.unwrap(), b"one");
        assert_eq!(consumer.recv().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn queue_rejects_second_consumer() {
        let broker = MemoryBroker::new();
        let _first = broker.consume_queue("q").await.unwrap();
        assert!(broker.consume_queue("q").await.is_err());
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let broker = MemoryBroker::new();
        let keep = broker.subscribe_fanout("ex").await.unwrap();
        let drop_me = broker.subscribe_fanout("ex").await.unwrap();
        drop(drop_me);

        broker.publish_fanout("ex", b"msg".to_vec()).await.unwrap();
        assert_eq!(broker.lock().exchanges["ex"].len(), 1);
        drop(keep);
    }
}
