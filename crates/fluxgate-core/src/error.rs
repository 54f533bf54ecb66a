//! Error types for fluxgate-core.

use thiserror::Error;

/// Core error type.
///
/// Errors local to one per-source or per-connection task are logged and
/// contained there; only well-formed events cross the event bus.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed wire payload. The message is dropped, the stream continues.
    #[error("decode error: {0}")]
    Decode(String),

    /// A reading could not be serialized for the wire.
    #[error("encode error: {0}")]
    Encode(String),

    /// A broker operation failed.
    #[error("broker error: {0}")]
    Broker(#[from] fluxgate_broker::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
