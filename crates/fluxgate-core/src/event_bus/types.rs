use crate::reading::Reading;

/// Well-known topic carrying newly discovered source names.
pub const SOURCE_DISCOVERED: &str = "source-discovered";

/// Per-source reading topic. Topics are matched by exact string equality, so
/// per-source fan-out is per-source topic strings, not wildcards.
#[must_use]
pub fn reading_topic(source: &str) -> String {
    format!("reading:{source}")
}

/// Payload of a bus publish.
///
/// A tagged union rather than an opaque value: the payload kind is fixed by
/// the topic (`source-discovered` carries names, `reading:*` carries
/// readings) and handlers match on it exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A source was seen for the first time.
    SourceDiscovered(String),
    /// One decoded reading from a source.
    Reading(Reading),
}
