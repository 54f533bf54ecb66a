//! Per-viewer connection handling.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use fluxgate_broker::{topology, Broker};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::ViewerMessage;
use super::registry::SocketRegistry;

/// Drive one viewer socket: fan broadcast frames out to it and read control
/// messages off it. Any read or write failure is treated as a disconnect,
/// not an error: the socket is removed and the rest of the set is untouched.
pub async fn handle_viewer(
    socket: WebSocket,
    registry: Arc<SocketRegistry>,
    broker: Arc<dyn Broker>,
) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "viewer connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut outgoing) = mpsc::unbounded_channel::<String>();
    registry.add(conn_id, tx);

    loop {
        tokio::select! {
            frame = outgoing.recv() => {
                match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    // A failed broadcast already pruned this socket.
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &broker, conn_id).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "viewer socket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    registry.remove(conn_id);
    info!(conn_id = %conn_id, "viewer disconnected");
}

/// The only recognized client frame is `discover`, forwarded into the broker
/// so a coordinator replays its known sources.
async fn handle_client_message(text: &str, broker: &Arc<dyn Broker>, conn_id: Uuid) {
    match serde_json::from_str::<ViewerMessage>(text) {
        Ok(ViewerMessage::Discover) => {
            debug!(conn_id = %conn_id, "viewer discovery request");
            if let Err(e) = broker
                .publish_queue(topology::VIEWER_DISCOVERY_QUEUE, Vec::new())
                .await
            {
                warn!(conn_id = %conn_id, error = %e, "failed to forward discovery request");
            }
        }
        Ok(_) => {} // server-to-client frame types from a client are ignored
        Err(e) => debug!(conn_id = %conn_id, error = %e, "unrecognized viewer message"),
    }
}
