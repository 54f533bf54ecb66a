//! Redis-backed broker.
//!
//! Fan-out exchanges map to Redis pub/sub channels; named queues map to
//! Redis lists consumed with `BRPOP`. Steady-state consume failures retry
//! with capped exponential backoff instead of terminating the stream.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::{Broker, Consumer};

/// `BRPOP` wake-up interval, so a consumer notices its receiver went away.
const QUEUE_POLL_SECS: u64 = 5;

/// Redis-backed [`Broker`].
pub struct RedisBroker {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
}

impl RedisBroker {
    /// Connect to Redis. Failure here is fatal: the coordinator cannot run
    /// without its broker.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::Connect(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish_fanout(&self, exchange: &str, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(exchange)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::Publish {
                target: exchange.to_string(),
                message: e.to_string(),
            })
    }

    async fn publish_queue(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(queue)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::Publish {
                target: queue.to_string(),
                message: e.to_string(),
            })
    }

    async fn subscribe_fanout(&self, exchange: &str) -> Result<Consumer> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::Subscribe {
                target: exchange.to_string(),
                message: e.to_string(),
            })?;
        pubsub
            .subscribe(exchange)
            .await
            .map_err(|e| Error::Subscribe {
                target: exchange.to_string(),
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let exchange = exchange.to_string();
        tokio::spawn(async move {
            let mut backoff = Backoff::new();
            loop {
                let mut stream = pubsub.into_on_message();
                loop {
                    tokio::select! {
                        () = tx.closed() => return,
                        msg = stream.next() => match msg {
                            Some(msg) => {
                                backoff.reset();
                                if tx.send(msg.get_payload_bytes().to_vec()).is_err() {
                                    return;
                                }
                            }
                            // Stream end means the pub/sub connection dropped.
                            None => break,
                        },
                    }
                }
                warn!(exchange = %exchange, "pub/sub stream ended, reconnecting");
                pubsub = match resubscribe(&client, &exchange, &tx, &mut backoff).await {
                    Some(ps) => ps,
                    None => return,
                };
                debug!(exchange = %exchange, "pub/sub resubscribed");
            }
        });
        Ok(Consumer::new(rx))
    }

    async fn consume_queue(&self, queue: &str) -> Result<Consumer> {
        // Dedicated connection: BRPOP blocks, and must not stall the shared
        // multiplexed pipe used for publishes.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Subscribe {
                target: queue.to_string(),
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = queue.to_string();
        tokio::spawn(async move {
            let mut backoff = Backoff::new();
            let mut pop = redis::cmd("BRPOP");
            pop.arg(&queue).arg(QUEUE_POLL_SECS);
            loop {
                tokio::select! {
                    () = tx.closed() => return,
                    result = pop.query_async::<Option<(String, Vec<u8>)>>(&mut conn) => match result {
                        Ok(Some((_, payload))) => {
                            backoff.reset();
                            if tx.send(payload).is_err() {
                                return;
                            }
                        }
                        // Timed out with nothing queued.
                        Ok(None) => {}
                        Err(e) => {
                            let delay = backoff.next_delay();
                            warn!(queue = %queue, error = %e, delay_ms = delay.as_millis() as u64, "queue consume failed, backing off");
                            tokio::select! {
                                () = tx.closed() => return,
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                    },
                }
            }
        });
        Ok(Consumer::new(rx))
    }
}

/// Re-establish a pub/sub subscription, backing off between attempts.
/// Returns `None` once the consumer side is gone.
async fn resubscribe(
    client: &redis::Client,
    exchange: &str,
    tx: &mpsc::UnboundedSender<Vec<u8>>,
    backoff: &mut Backoff,
) -> Option<redis::aio::PubSub> {
    loop {
        let delay = backoff.next_delay();
        tokio::select! {
            () = tx.closed() => return None,
            () = tokio::time::sleep(delay) => {}
        }
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => match pubsub.subscribe(exchange).await {
                Ok(()) => return Some(pubsub),
                Err(e) => warn!(exchange = %exchange, error = %e, "resubscribe failed"),
            },
            Err(e) => warn!(exchange = %exchange, error = %e, "pub/sub reconnect failed"),
        }
    }
}

/// Capped exponential backoff.
struct Backoff {
    delay: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(30);

    fn new() -> Self {
        Self {
            delay: Self::INITIAL,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(Self::MAX);
        delay
    }

    fn reset(&mut self) {
        self.delay = Self::INITIAL;
    }
}

#[cfg(test)]
mod tests {
    use super::Backoff;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Backoff::INITIAL);
        assert_eq!(backoff.next_delay(), Backoff::INITIAL * 2);
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Backoff::MAX);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Backoff::INITIAL);
    }
}
