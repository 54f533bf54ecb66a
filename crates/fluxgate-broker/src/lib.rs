//! Fluxgate Broker - message-broker abstraction
//!
//! This crate isolates the rest of the coordinator from the concrete broker.
//! It models the two delivery shapes the pipeline needs:
//! - fan-out exchanges: every bound subscriber sees every message
//! - named queues: each message is handed to exactly one consumer
//!
//! Two implementations are provided:
//! - [`RedisBroker`]: pub/sub channels as exchanges, lists as queues
//! - [`MemoryBroker`]: in-process, used by tests and broker-less development

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod redis_broker;
pub mod topology;

pub use error::{Error, Result};
pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Client-side view of the message broker.
///
/// Publish failures are surfaced as typed errors so callers can decide
/// between log-and-drop and propagation. Subscription methods return a
/// [`Consumer`]; dropping it releases the underlying stream.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish to a fan-out exchange. Delivered to every subscriber bound at
    /// publish time; a no-op when nothing is bound.
    async fn publish_fanout(&self, exchange: &str, payload: Vec<u8>) -> Result<()>;

    /// Enqueue on a named queue for exactly one consumer. Messages published
    /// before a consumer exists are buffered by the broker.
    async fn publish_queue(&self, queue: &str, payload: Vec<u8>) -> Result<()>;

    /// Bind an auto-deleting subscription to a fan-out exchange.
    ///
    /// Only messages published after the bind are seen, which is what the
    /// discovery handshake relies on: request after binding, never before.
    async fn subscribe_fanout(&self, exchange: &str) -> Result<Consumer>;

    /// Start consuming a named queue as a competing consumer.
    async fn consume_queue(&self, queue: &str) -> Result<Consumer>;
}

/// An ordered stream of raw payloads delivered by the broker.
pub struct Consumer {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Consumer {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Receive the next payload. `None` means the stream ended and will not
    /// deliver again.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}
