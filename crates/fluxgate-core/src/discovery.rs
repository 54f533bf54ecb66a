//! Source discovery listener.
//!
//! Runs the discovery handshake against the broker and turns each discovered
//! source into a dedicated consumption task that republishes decoded readings
//! onto the event bus.
//!
//! The announcement stream is bound *before* the discovery request goes out:
//! sensors answer every request they hear, so a coordinator that starts late
//! still learns about pre-existing sources, provided it cannot miss the
//! answers to its own request.

use std::collections::HashSet;
use std::sync::Arc;

use fluxgate_broker::{topology, Broker, Consumer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::event_bus::{reading_topic, BusEvent, EventBus, SOURCE_DISCOVERED};
use crate::reading::Reading;

/// Discovers sources and feeds their readings to the event bus.
pub struct SourceDiscoveryListener {
    broker: Arc<dyn Broker>,
    bus: Arc<EventBus>,
    known: HashSet<String>,
}

impl SourceDiscoveryListener {
    /// Create a listener. Nothing touches the broker until [`Self::run`].
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, bus: Arc<EventBus>) -> Self {
        Self {
            broker,
            bus,
            known: HashSet::new(),
        }
    }

    /// Run one discovery cycle until cancelled: bind the announcement stream,
    /// broadcast a discovery request, then consume announcements forever.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut announcements = self
            .broker
            .subscribe_fanout(topology::SOURCE_ANNOUNCE_EXCHANGE)
            .await?;
        self.broker
            .publish_fanout(topology::DISCOVERY_REQUEST_EXCHANGE, Vec::new())
            .await?;
        info!("listening for source announcements");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                msg = announcements.recv() => match msg {
                    Some(payload) => self.handle_announcement(payload, &cancel).await,
                    None => {
                        warn!("announcement stream ended");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    /// Handle one announcement. Duplicates are ignored, which bounds the
    /// number of consumption tasks to the number of distinct sources seen.
    async fn handle_announcement(&mut self, payload: Vec<u8>, cancel: &CancellationToken) {
        let name = match String::from_utf8(payload) {
            Ok(name) if !name.is_empty() => name,
            Ok(_) => {
                warn!("empty source announcement, skipping");
                return;
            }
            Err(e) => {
                warn!(error = %e, "source announcement was not valid UTF-8, skipping");
                return;
            }
        };

        if self.known.contains(&name) {
            debug!(source = %name, "duplicate announcement ignored");
            return;
        }

        // Open the reading stream first: if it fails the source stays
        // unknown and a later announcement retries it.
        let consumer = match self.broker.consume_queue(&name).await {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!(source = %name, error = %e, "failed to open reading stream");
                return;
            }
        };

        self.known.insert(name.clone());
        info!(source = %name, "source discovered");

        // Forwarders subscribe to the reading topic while this publish runs,
        // before the consumption task below can deliver anything.
        self.bus
            .publish(SOURCE_DISCOVERED, &BusEvent::SourceDiscovered(name.clone()));

        tokio::spawn(consume_source(
            consumer,
            self.bus.clone(),
            name,
            cancel.child_token(),
        ));
    }
}

/// Per-source consumption task: decode each wire message and republish it on
/// the source's reading topic. A decode failure drops that message only.
async fn consume_source(
    mut consumer: Consumer,
    bus: Arc<EventBus>,
    source: String,
    cancel: CancellationToken,
) {
    let topic = reading_topic(&source);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = consumer.recv() => match msg {
                Some(payload) => match Reading::from_bytes(&payload) {
                    Ok(reading) => {
                        bus.publish(&topic, &BusEvent::Reading(reading));
                    }
                    Err(e) => warn!(source = %source, error = %e, "dropping undecodable reading"),
                },
                None => {
                    warn!(source = %source, "reading stream ended");
                    break;
                }
            },
        }
    }
    debug!(source = %source, "consumption task stopped");
}
