//! Sensor reading domain type and its wire encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One timestamped observation from a source.
///
/// Immutable once constructed; identity is `(name, observed_at)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Name of the source that produced the reading.
    pub name: String,
    /// Observed value.
    pub value: f64,
    /// When the source took the observation.
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    /// Create a reading.
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value,
            observed_at,
        }
    }

    /// Encode for the broker wire. Round-trips exactly through [`Self::from_bytes`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Decode a wire payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_encoding_round_trips_exactly() {
        let reading = Reading::new("r1", 3.14, "2026-08-06T12:00:00.123456789Z".parse().unwrap());
        let bytes = reading.to_bytes().unwrap();
        let decoded = Reading::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let err = Reading::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn missing_field_is_a_decode_error() {
        let err = Reading::from_bytes(br#"{"name":"r1","value":1.0}"#).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
