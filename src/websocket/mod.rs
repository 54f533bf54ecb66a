//! Live-Socket Gateway.
//!
//! Relays broker broadcast traffic to every connected viewer socket and
//! forwards viewer discovery requests back into the broker.
//!
//! Flow:
//! 1. Browser connects to `/ws`; the connection joins the socket registry
//! 2. Two relay loops mirror the viewer exchanges to all sockets
//! 3. A `discover` frame from any viewer is forwarded to the broker, and a
//!    coordinator answers by re-announcing its known sources

pub mod connection;
pub mod protocol;
pub mod registry;
pub mod relay;

#[cfg(test)]
mod tests;

pub use registry::SocketRegistry;

use std::sync::Arc;

use axum::{extract::ws::WebSocketUpgrade, response::IntoResponse, Extension};
use fluxgate_broker::Broker;

/// WebSocket upgrade handler for `/ws`.
pub async fn viewer_handler(
    ws: WebSocketUpgrade,
    Extension(registry): Extension<Arc<SocketRegistry>>,
    Extension(broker): Extension<Arc<dyn Broker>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_viewer(socket, registry, broker))
}
