//! Error types for fluxgate-broker.

use thiserror::Error;

/// Broker error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Initial connection to the broker failed. Fatal at startup.
    #[error("broker connection failed: {0}")]
    Connect(String),

    /// A publish was refused by the broker.
    #[error("publish to '{target}' failed: {message}")]
    Publish {
        /// Exchange or queue name.
        target: String,
        /// Broker-reported failure.
        message: String,
    },

    /// A subscription or queue consume could not be established.
    #[error("subscribe to '{target}' failed: {message}")]
    Subscribe {
        /// Exchange or queue name.
        target: String,
        /// Broker-reported failure.
        message: String,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
