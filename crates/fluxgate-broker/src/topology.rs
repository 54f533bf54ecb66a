//! Fixed broker topology.
//!
//! Every name here is a protocol constant shared with the sensors and the
//! viewer gateway, not configuration.

/// Fan-out exchange the coordinator broadcasts empty discovery requests on.
/// Sensors answer every request they receive by re-announcing themselves.
pub const DISCOVERY_REQUEST_EXCHANGE: &str = "sensors.discovery";

/// Fan-out exchange sensors announce their reading-queue name on, both at
/// startup and in reply to a discovery request. Payload is the source name
/// as raw UTF-8 bytes.
pub const SOURCE_ANNOUNCE_EXCHANGE: &str = "sensors.announce";

/// Durable queue of encoded readings awaiting the persistence writer.
pub const PERSIST_QUEUE: &str = "readings.persist";

/// Queue of viewer discovery requests; any one coordinator picks each up and
/// replays its known sources.
pub const VIEWER_DISCOVERY_QUEUE: &str = "viewers.discovery";

/// Fan-out exchange carrying source announcements to viewer gateways.
pub const VIEWER_SOURCES_EXCHANGE: &str = "viewers.sources";

/// Fan-out exchange carrying every reading to viewer gateways.
pub const VIEWER_READINGS_EXCHANGE: &str = "viewers.readings";
