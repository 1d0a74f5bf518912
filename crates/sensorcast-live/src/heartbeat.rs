//! Per-connection keep-alive.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use sensorcast_core::{ConnectionId, Frame};

use crate::metrics::HEARTBEATS_SENT;
use crate::registry::ClientRegistry;

/// Default keep-alive cadence.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The connection's token was cancelled (closed or shutting down).
    Cancelled,
    /// The connection was no longer registered at tick time.
    Gone,
    /// The ping could not be written; the connection has been removed.
    WriteFailed,
}

/// Write a ping to connection `id` every `interval` until it closes.
///
/// The task holds the registry and the id only, never the transport. The
/// first ping goes out one full interval after the call.
pub async fn run_heartbeat(
    registry: Arc<ClientRegistry>,
    id: ConnectionId,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break HeartbeatResult::Cancelled,
            _ = ticker.tick() => {
                let Some(conn) = registry.get(id) else {
                    break HeartbeatResult::Gone;
                };
                if !conn.is_active() {
                    break HeartbeatResult::Gone;
                }
                match conn.send(Frame::Ping) {
                    Ok(()) => {
                        registry.metrics().counter_inc(HEARTBEATS_SENT, &[], 1);
                        trace!(conn_id = %id, "sent ping");
                    }
                    Err(e) => {
                        registry.remove(id, e.into());
                        break HeartbeatResult::WriteFailed;
                    }
                }
            }
        }
    };

    debug!(conn_id = %id, result = ?result, "heartbeat stopped");
    result
}
