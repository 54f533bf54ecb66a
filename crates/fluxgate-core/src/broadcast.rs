//! Fan-out broadcast forwarder.
//!
//! Mirrors every discovered source and every reading, unthrottled, onto
//! the viewer exchanges, and answers viewer discovery requests by replaying
//! the full list of known sources.

use std::sync::{Arc, Mutex, PoisonError};

use fluxgate_broker::{topology, Broker};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::event_bus::{reading_topic, BusEvent, EventBus, SOURCE_DISCOVERED};
use crate::reading::Reading;

/// What the forwarder broadcasts. Live announcements and replayed ones go
/// through the same channel, so the two paths cannot race destructively.
enum Outbound {
    Source(String),
    Reading(Reading),
}

/// Forwards sources and readings to the viewer broadcast exchanges.
pub struct BroadcastForwarder {
    known: Arc<Mutex<Vec<String>>>,
}

impl BroadcastForwarder {
    /// Wire the forwarder into the bus, start its publish task and the
    /// discovery-request replay task.
    ///
    /// Like the persistence forwarder, this must run before the discovery
    /// listener starts.
    pub async fn start(
        bus: Arc<EventBus>,
        broker: Arc<dyn Broker>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (outbox, outbox_rx) = mpsc::unbounded_channel::<Outbound>();
        let known: Arc<Mutex<Vec<String>>> = Arc::default();

        tokio::spawn(publish_outbound(
            broker.clone(),
            outbox_rx,
            cancel.clone(),
        ));

        let requests = broker
            .consume_queue(topology::VIEWER_DISCOVERY_QUEUE)
            .await?;
        tokio::spawn(replay_on_request(
            requests,
            known.clone(),
            outbox.clone(),
            cancel,
        ));

        let handler_bus = bus.clone();
        let handler_known = known.clone();
        bus.subscribe(SOURCE_DISCOVERED, move |event| {
            let BusEvent::SourceDiscovered(name) = event else {
                return;
            };
            {
                let mut list = handler_known.lock().unwrap_or_else(PoisonError::into_inner);
                if list.iter().any(|known| known == name) {
                    return;
                }
                list.push(name.clone());
            }
            info!(source = %name, "broadcasting new source");
            // Announce immediately so connected viewers learn of the source
            // without polling.
            let _ = outbox.send(Outbound::Source(name.clone()));

            let outbox = outbox.clone();
            handler_bus.subscribe(reading_topic(name), move |event| {
                if let BusEvent::Reading(reading) = event {
                    let _ = outbox.send(Outbound::Reading(reading.clone()));
                }
            });
        });

        Ok(Self { known })
    }

    /// Snapshot of the sources this forwarder has seen, in discovery order.
    #[must_use]
    pub fn known_sources(&self) -> Vec<String> {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Drains the outbox onto the viewer exchanges. Publish failures drop that
/// message and are logged; there is no retry queue.
async fn publish_outbound(
    broker: Arc<dyn Broker>,
    mut outbox_rx: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            outbound = outbox_rx.recv() => {
                let Some(outbound) = outbound else { break };
                let result = match outbound {
                    Outbound::Source(name) => {
                        broker
                            .publish_fanout(topology::VIEWER_SOURCES_EXCHANGE, name.into_bytes())
                            .await
                    }
                    Outbound::Reading(reading) => match reading.to_bytes() {
                        Ok(bytes) => {
                            broker
                                .publish_fanout(topology::VIEWER_READINGS_EXCHANGE, bytes)
                                .await
                        }
                        Err(e) => {
                            warn!(source = %reading.name, error = %e, "failed to encode reading for broadcast");
                            continue;
                        }
                    },
                };
                if let Err(e) = result {
                    warn!(error = %e, "broadcast publish failed, message dropped");
                }
            }
        }
    }
    debug!("broadcast publisher stopped");
}

/// Replays the whole known-sources list for every viewer discovery request.
/// A replay may interleave with a concurrent live announcement; no ordering
/// between the two is promised.
async fn replay_on_request(
    mut requests: fluxgate_broker::Consumer,
    known: Arc<Mutex<Vec<String>>>,
    outbox: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = requests.recv() => match msg {
                Some(_) => {
                    let snapshot = known.lock().unwrap_or_else(PoisonError::into_inner).clone();
                    debug!(count = snapshot.len(), "replaying known sources for a viewer");
                    for name in snapshot {
                        let _ = outbox.send(Outbound::Source(name));
                    }
                }
                None => break,
            },
        }
    }
    debug!("discovery-request replay stopped");
}
