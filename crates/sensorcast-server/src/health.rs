//! `/health` endpoint.

use serde::Serialize;

use sensorcast_live::LiveHub;
use sensorcast_telemetry::MetricsSnapshot;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: String,
    pub uptime_secs: u64,
    /// Currently registered live connections.
    pub connections: usize,
    /// Active change-detection strategy.
    pub strategy: String,
    pub metrics: MetricsSnapshot,
}

/// Build a health response from the hub's live counters.
pub fn health_check(hub: &LiveHub) -> HealthResponse {
    HealthResponse {
        status: if hub.is_shutting_down() { "shutting_down" } else { "ok" }.into(),
        uptime_secs: hub.uptime().as_secs(),
        connections: hub.connection_count(),
        strategy: hub.strategy().to_string(),
        metrics: hub.metrics().snapshot(),
    }
}
