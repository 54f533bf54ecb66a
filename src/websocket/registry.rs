//! Connected viewer socket set.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ViewerMessage;

/// Outgoing handle for one connected viewer. The receiving half lives in the
/// connection's writer loop; a closed channel means the connection is gone.
struct SocketHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// Ordered set of live viewer connections.
///
/// Add, remove, and the sweep inside [`Self::broadcast`] all happen under one
/// mutex, so membership and "is this socket open" never diverge.
#[derive(Default)]
pub struct SocketRegistry {
    sockets: Mutex<Vec<SocketHandle>>,
}

impl SocketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SocketHandle>> {
        self.sockets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection.
    pub fn add(&self, id: Uuid, tx: mpsc::UnboundedSender<String>) {
        self.lock().push(SocketHandle { id, tx });
        debug!(conn_id = %id, "socket added");
    }

    /// Remove a connection. Returns whether it was present.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut sockets = self.lock();
        let before = sockets.len();
        sockets.retain(|socket| socket.id != id);
        before != sockets.len()
    }

    /// Send a message to every connected viewer.
    ///
    /// The frame is serialized once. A socket whose channel has closed is
    /// pruned here and will not be attempted again; the remaining sockets
    /// still receive the message. Returns how many received it.
    pub fn broadcast(&self, message: &ViewerMessage) -> usize {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to serialize viewer message");
                return 0;
            }
        };

        let mut sockets = self.lock();
        sockets.retain(|socket| {
            let delivered = socket.tx.send(text.clone()).is_ok();
            if !delivered {
                debug!(conn_id = %socket.id, "pruning dead socket");
            }
            delivered
        });
        sockets.len()
    }

    /// Number of connected viewers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no viewer is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
