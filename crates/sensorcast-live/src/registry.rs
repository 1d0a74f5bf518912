use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sensorcast_core::{ConnectionId, Frame, Subscription};
use sensorcast_telemetry::MetricsRecorder;

use crate::connection::{CloseReason, Connection};
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED, CONNECTIONS_EVICTED, CONNECTIONS_OPENED,
};

/// Registry of live connections, keyed by registry-assigned id.
///
/// Every close path (observer disconnect, failed write, heartbeat failure,
/// shutdown) goes through [`ClientRegistry::remove`].
pub struct ClientRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    next_id: AtomicU64,
    parent: CancellationToken,
    metrics: Arc<MetricsRecorder>,
}

impl ClientRegistry {
    /// Connection tokens are children of `parent`, so cancelling it stops
    /// every connection's background work.
    pub fn new(parent: CancellationToken, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            parent,
            metrics,
        }
    }

    pub fn register(
        &self,
        sink: mpsc::Sender<Frame>,
        subscription: Subscription,
    ) -> Arc<Connection> {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let sensors = subscription.len();
        let conn = Arc::new(Connection::new(
            id,
            sink,
            subscription,
            self.parent.child_token(),
        ));
        self.connections.insert(id, Arc::clone(&conn));

        self.metrics.counter_inc(CONNECTIONS_OPENED, &[], 1);
        self.metrics.gauge_add(CONNECTIONS_ACTIVE, &[], 1);
        info!(conn_id = %id, sensors, "connection registered");

        // A shutdown that swept the map before the insert would miss it.
        if self.parent.is_cancelled() {
            self.remove(id, CloseReason::Shutdown);
        }
        conn
    }

    /// Remove a connection. Idempotent: returns `false` if `id` was not
    /// registered (already removed or never existed).
    pub fn remove(&self, id: ConnectionId, reason: CloseReason) -> bool {
        let Some((_, conn)) = self.connections.remove(&id) else {
            debug!(conn_id = %id, reason = reason.as_str(), "remove of absent connection ignored");
            return false;
        };
        conn.close();

        self.metrics.counter_inc(CONNECTIONS_CLOSED, &[], 1);
        self.metrics.gauge_add(CONNECTIONS_ACTIVE, &[], -1);
        if reason.is_eviction() {
            self.metrics
                .counter_inc(CONNECTIONS_EVICTED, &[("reason", reason.as_str())], 1);
        }
        info!(
            conn_id = %id,
            reason = reason.as_str(),
            delivered = conn.frames_delivered(),
            dropped = conn.frames_dropped(),
            age_ms = conn.age().as_millis() as u64,
            "connection removed"
        );
        true
    }

    /// Snapshot of the connections that are active right now. No map lock
    /// is held once this returns.
    pub fn active_snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Visit every active connection. `visit` may call back into the
    /// registry, including [`ClientRegistry::remove`].
    pub fn for_each_active<F>(&self, mut visit: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        for conn in self.active_snapshot() {
            visit(&conn);
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Remove every connection; returns how many were removed.
    pub fn remove_all(&self, reason: CloseReason) -> usize {
        self.ids()
            .into_iter()
            .filter(|id| self.remove(*id, reason))
            .count()
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(CancellationToken::new(), Arc::new(MetricsRecorder::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        mpsc::channel(8)
    }

    #[test]
    fn register_assigns_unique_ids() {
        let registry = ClientRegistry::default();
        let (tx1, _rx1) = sink();
        let (tx2, _rx2) = sink();
        let a = registry.register(tx1, Subscription::all());
        let b = registry.register(tx2, Subscription::all());
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.ids(), vec![a.id(), b.id()]);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ClientRegistry::default();
        let (tx, _rx) = sink();
        let conn = registry.register(tx, Subscription::all());

        assert!(registry.remove(conn.id(), CloseReason::Disconnected));
        assert!(!registry.remove(conn.id(), CloseReason::Disconnected));
        assert!(!conn.is_active());
        assert!(registry.get(conn.id()).is_none());
        assert_eq!(registry.metrics().counter_get(CONNECTIONS_CLOSED, &[]), 1);
        assert_eq!(registry.metrics().gauge_get(CONNECTIONS_ACTIVE, &[]), 0);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let registry = ClientRegistry::default();
        assert!(!registry.remove(ConnectionId::new(99), CloseReason::Shutdown));
    }

    #[test]
    fn remove_cancels_connection_token() {
        let registry = ClientRegistry::default();
        let (tx, _rx) = sink();
        let conn = registry.register(tx, Subscription::all());
        let token = conn.cancel_token().clone();
        registry.remove(conn.id(), CloseReason::SinkFull);
        assert!(token.is_cancelled());
        assert_eq!(
            registry
                .metrics()
                .counter_get(CONNECTIONS_EVICTED, &[("reason", "sink_full")]),
            1
        );
    }

    #[test]
    fn parent_cancel_reaches_connections() {
        let parent = CancellationToken::new();
        let registry = ClientRegistry::new(parent.clone(), Arc::new(MetricsRecorder::new()));
        let (tx, _rx) = sink();
        let conn = registry.register(tx, Subscription::all());
        parent.cancel();
        assert!(conn.cancel_token().is_cancelled());
    }

    #[test]
    fn register_after_parent_cancel_is_removed() {
        let parent = CancellationToken::new();
        let registry = ClientRegistry::new(parent.clone(), Arc::new(MetricsRecorder::new()));
        parent.cancel();
        // The shutdown sweep already ran and found nothing.
        assert_eq!(registry.remove_all(CloseReason::Shutdown), 0);

        let (tx, mut rx) = sink();
        let conn = registry.register(tx, Subscription::all());
        assert!(!conn.is_active());
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.metrics().gauge_get(CONNECTIONS_ACTIVE, &[]), 0);

        // Once the caller lets go, the sink closes and the reader ends.
        drop(conn);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn visit_may_remove() {
        let registry = ClientRegistry::default();
        let mut rxs = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = sink();
            rxs.push(rx);
            registry.register(tx, Subscription::all());
        }

        let mut visited = 0;
        registry.for_each_active(|conn| {
            visited += 1;
            registry.remove(conn.id(), CloseReason::Disconnected);
        });
        assert_eq!(visited, 3);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn snapshot_excludes_closed() {
        let registry = ClientRegistry::default();
        let (tx1, _rx1) = sink();
        let (tx2, _rx2) = sink();
        let a = registry.register(tx1, Subscription::all());
        let b = registry.register(tx2, Subscription::all());
        a.close();

        let snapshot = registry.active_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), b.id());
    }

    #[test]
    fn remove_all_empties_registry() {
        let registry = ClientRegistry::default();
        let mut rxs = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = sink();
            rxs.push(rx);
            registry.register(tx, Subscription::all());
        }
        assert_eq!(registry.remove_all(CloseReason::Shutdown), 4);
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.remove_all(CloseReason::Shutdown), 0);
    }

    #[test]
    fn concurrent_register_and_remove() {
        let registry = Arc::new(ClientRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let (tx, _rx) = mpsc::channel(1);
                        let conn = registry.register(tx, Subscription::all());
                        let _ = registry.active_snapshot();
                        assert!(registry.remove(conn.id(), CloseReason::Disconnected));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.metrics().counter_get(CONNECTIONS_OPENED, &[]), 400);
    }
}
