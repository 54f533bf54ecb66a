//! Throttled persistence forwarder.
//!
//! Subscribes to per-source reading topics and forwards at most one reading
//! per source per throttle window to the durable persistence queue. The
//! throttle is a sample, not a buffer: dropped readings are gone, there is no
//! catch-up burst.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fluxgate_broker::{topology, Broker};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event_bus::{reading_topic, BusEvent, EventBus, SOURCE_DISCOVERED};
use crate::reading::Reading;

/// Per-source throttle state, created lazily when the source is discovered
/// and only ever touched from that source's reading handler.
#[derive(Debug, Default)]
pub struct ThrottleState {
    last_forwarded_at: Option<Instant>,
}

impl ThrottleState {
    /// Decide whether a reading observed at `now` passes the throttle,
    /// recording the forward time when it does. The first reading for a
    /// source always passes.
    pub fn try_forward(&mut self, now: Instant, window: Duration) -> bool {
        match self.last_forwarded_at {
            Some(last) if now.duration_since(last) < window => false,
            _ => {
                self.last_forwarded_at = Some(now);
                true
            }
        }
    }

    /// When this source last passed the throttle.
    #[must_use]
    pub fn last_forwarded_at(&self) -> Option<Instant> {
        self.last_forwarded_at
    }
}

/// Forwards throttled readings to the persistence queue.
pub struct PersistenceForwarder {
    throttles: Arc<Mutex<HashMap<String, ThrottleState>>>,
}

impl PersistenceForwarder {
    /// Wire the forwarder into the bus and spawn its publish task.
    ///
    /// Must be called before the discovery listener starts, so the
    /// `source-discovered` subscription exists before the first announcement
    /// is dispatched.
    pub fn start(
        bus: Arc<EventBus>,
        broker: Arc<dyn Broker>,
        window: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Reading>();
        let throttles: Arc<Mutex<HashMap<String, ThrottleState>>> = Arc::default();

        // All broker I/O happens here, so the bus handlers above it never
        // block on broker backpressure.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    reading = outbox_rx.recv() => {
                        let Some(reading) = reading else { break };
                        let bytes = match reading.to_bytes() {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                error!(source = %reading.name, error = %e, "failed to encode reading");
                                continue;
                            }
                        };
                        if let Err(e) = broker.publish_queue(topology::PERSIST_QUEUE, bytes).await {
                            warn!(source = %reading.name, error = %e, "persist publish failed, reading dropped");
                        }
                    }
                }
            }
            debug!("persistence publisher stopped");
        });

        let handler_bus = bus.clone();
        let handler_throttles = throttles.clone();
        bus.subscribe(SOURCE_DISCOVERED, move |event| {
            let BusEvent::SourceDiscovered(name) = event else {
                return;
            };
            {
                let mut map = handler_throttles
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if map.contains_key(name) {
                    return;
                }
                map.insert(name.clone(), ThrottleState::default());
            }
            info!(source = %name, "throttling readings for persistence");

            let throttles = handler_throttles.clone();
            let outbox = outbox.clone();
            handler_bus.subscribe(reading_topic(name), move |event| {
                let BusEvent::Reading(reading) = event else {
                    return;
                };
                let forward = {
                    let mut map = throttles.lock().unwrap_or_else(PoisonError::into_inner);
                    let Some(state) = map.get_mut(&reading.name) else {
                        return;
                    };
                    state.try_forward(Instant::now(), window)
                };
                if forward {
                    let _ = outbox.send(reading.clone());
                }
            });
        });

        Self { throttles }
    }

    /// Whether throttle state exists for `source`.
    #[must_use]
    pub fn tracks(&self, source: &str) -> bool {
        self.throttles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(source)
    }
}

#[cfg(test)]
mod tests {
    use fluxgate_broker::MemoryBroker;
    use tokio::time::{advance, timeout};

    use super::*;

    const WINDOW: Duration = Duration::from_secs(5);
    const WAIT: Duration = Duration::from_secs(1);

    fn reading(name: &str, value: f64) -> Reading {
        Reading::new(name, value, "2026-08-06T12:00:00Z".parse().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn first_reading_always_passes() {
        let mut state = ThrottleState::default();
        assert!(state.try_forward(Instant::now(), WINDOW));
        assert!(state.last_forwarded_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn readings_inside_the_window_are_dropped() {
        let mut state = ThrottleState::default();
        assert!(state.try_forward(Instant::now(), WINDOW));

        advance(Duration::from_secs(2)).await;
        assert!(!state.try_forward(Instant::now(), WINDOW));

        // 2s + 4s = 6s since the last forward: past the window again.
        advance(Duration::from_secs(4)).await;
        assert!(state.try_forward(Instant::now(), WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_one_reading_per_window_per_source() {
        let broker = Arc::new(MemoryBroker::new());
        let bus = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();
        let _forwarder =
            PersistenceForwarder::start(bus.clone(), broker.clone(), WINDOW, cancel.clone());

        bus.publish(SOURCE_DISCOVERED, &BusEvent::SourceDiscovered("temp1".into()));

        // t=0: forwarded. t=2s: inside the window, dropped. t=6s: forwarded.
        bus.publish(&reading_topic("temp1"), &BusEvent::Reading(reading("temp1", 1.0)));
        advance(Duration::from_secs(2)).await;
        bus.publish(&reading_topic("temp1"), &BusEvent::Reading(reading("temp1", 2.0)));
        advance(Duration::from_secs(4)).await;
        bus.publish(&reading_topic("temp1"), &BusEvent::Reading(reading("temp1", 3.0)));

        let mut persisted = broker.consume_queue(topology::PERSIST_QUEUE).await.unwrap();
        for expected in [1.0, 3.0] {
            let payload = timeout(WAIT, persisted.recv()).await.unwrap().unwrap();
            assert_eq!(Reading::from_bytes(&payload).unwrap().value, expected);
        }
        assert!(timeout(Duration::from_millis(100), persisted.recv())
            .await
            .is_err());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_state_is_per_source() {
        let broker = Arc::new(MemoryBroker::new());
        let bus = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();
        let _forwarder =
            PersistenceForwarder::start(bus.clone(), broker.clone(), WINDOW, cancel.clone());

        for name in ["temp1", "temp2"] {
            bus.publish(SOURCE_DISCOVERED, &BusEvent::SourceDiscovered(name.into()));
            bus.publish(&reading_topic(name), &BusEvent::Reading(reading(name, 1.0)));
        }

        // One first-reading forward per source, not one total.
        let mut persisted = broker.consume_queue(topology::PERSIST_QUEUE).await.unwrap();
        let mut names = Vec::new();
        for _ in 0..2 {
            let payload = timeout(WAIT, persisted.recv()).await.unwrap().unwrap();
            names.push(Reading::from_bytes(&payload).unwrap().name);
        }
        names.sort();
        assert_eq!(names, vec!["temp1", "temp2"]);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_discovery_subscribes_once() {
        let broker = Arc::new(MemoryBroker::new());
        let bus = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();
        let forwarder =
            PersistenceForwarder::start(bus.clone(), broker.clone(), WINDOW, cancel.clone());

        bus.publish(SOURCE_DISCOVERED, &BusEvent::SourceDiscovered("temp1".into()));
        bus.publish(SOURCE_DISCOVERED, &BusEvent::SourceDiscovered("temp1".into()));

        assert!(forwarder.tracks("temp1"));
        assert_eq!(bus.subscriber_count(&reading_topic("temp1")), 1);
        cancel.cancel();
    }
}
