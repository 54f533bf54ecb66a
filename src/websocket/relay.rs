//! Broker → viewer relay loops.
//!
//! Two long-lived tasks, one per viewer exchange, each decoding messages and
//! fanning them out to every connected socket.

use std::sync::Arc;

use fluxgate_broker::{topology, Broker, Consumer};
use fluxgate_core::Reading;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::protocol::ViewerMessage;
use super::registry::SocketRegistry;

/// Bind both viewer exchanges and spawn their relay loops.
pub async fn start(
    broker: Arc<dyn Broker>,
    registry: Arc<SocketRegistry>,
    cancel: CancellationToken,
) -> Result<(), fluxgate_broker::Error> {
    let sources = broker
        .subscribe_fanout(topology::VIEWER_SOURCES_EXCHANGE)
        .await?;
    let readings = broker
        .subscribe_fanout(topology::VIEWER_READINGS_EXCHANGE)
        .await?;

    tokio::spawn(relay_sources(sources, registry.clone(), cancel.clone()));
    tokio::spawn(relay_readings(readings, registry, cancel));
    Ok(())
}

async fn relay_sources(
    mut consumer: Consumer,
    registry: Arc<SocketRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = consumer.recv() => match msg {
                Some(payload) => match String::from_utf8(payload) {
                    Ok(name) => {
                        registry.broadcast(&ViewerMessage::source(name));
                    }
                    Err(e) => warn!(error = %e, "source announcement was not valid UTF-8"),
                },
                None => break,
            },
        }
    }
    debug!("source relay stopped");
}

async fn relay_readings(
    mut consumer: Consumer,
    registry: Arc<SocketRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = consumer.recv() => match msg {
                Some(payload) => match Reading::from_bytes(&payload) {
                    Ok(reading) => {
                        registry.broadcast(&ViewerMessage::reading(reading));
                    }
                    Err(e) => warn!(error = %e, "dropping undecodable broadcast reading"),
                },
                None => break,
            },
        }
    }
    debug!("reading relay stopped");
}
