//! Metric names recorded by the live core.

pub const EVENTS_DISPATCHED: &str = "events_dispatched";
pub const FRAMES_DELIVERED: &str = "frames_delivered";
pub const CONNECTIONS_EVICTED: &str = "connections_evicted";
pub const CONNECTIONS_OPENED: &str = "connections_opened";
pub const CONNECTIONS_CLOSED: &str = "connections_closed";
pub const CONNECTIONS_ACTIVE: &str = "connections_active";
pub const SOURCE_BATCHES: &str = "source_batches";
pub const SOURCE_ERRORS: &str = "source_errors";
pub const HEARTBEATS_SENT: &str = "heartbeats_sent";
