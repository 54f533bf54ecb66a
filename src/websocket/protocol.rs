//! Viewer WebSocket wire protocol.
//!
//! JSON frames tagged by `type`. Viewers send `discover`; the gateway sends
//! `source` and `reading`.

use fluxgate_core::Reading;
use serde::{Deserialize, Serialize};

/// Descriptor sent to viewers when a source is announced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Source name.
    pub name: String,
}

/// All messages exchanged with a viewer socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewerMessage {
    /// Client → server: replay every known source.
    Discover,
    /// Server → client: a source exists.
    Source {
        /// The announced source.
        data: SourceDescriptor,
    },
    /// Server → client: one reading.
    Reading {
        /// The reading.
        data: Reading,
    },
}

impl ViewerMessage {
    /// Wrap a source name for the wire.
    pub fn source(name: impl Into<String>) -> Self {
        Self::Source {
            data: SourceDescriptor { name: name.into() },
        }
    }

    /// Wrap a reading for the wire.
    #[must_use]
    pub fn reading(reading: Reading) -> Self {
        Self::Reading { data: reading }
    }
}
