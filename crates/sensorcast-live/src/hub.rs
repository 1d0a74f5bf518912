use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sensorcast_core::{ChangeEvent, ConnectionId, Frame, Reading, Subscription};
use sensorcast_store::{ReadingStore, StoreError};
use sensorcast_telemetry::MetricsRecorder;

use crate::config::LiveConfig;
use crate::connection::{CloseReason, Connection, SinkError};
use crate::dispatcher::Dispatcher;
use crate::error::HubError;
use crate::heartbeat::run_heartbeat;
use crate::registry::ClientRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::source::{run_source, ChangeFeed, ChangeSource, Poller, SourceStrategy};
use crate::stream::FrameStream;

/// An admitted observer: its id plus the stream of frames to write out.
pub struct LiveConnection {
    pub id: ConnectionId,
    pub stream: FrameStream,
}

/// Composition of registry, dispatcher, change source and per-connection
/// heartbeats. Constructed explicitly; nothing runs until [`LiveHub::start`].
pub struct LiveHub {
    config: LiveConfig,
    store: Arc<dyn ReadingStore>,
    registry: Arc<ClientRegistry>,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownCoordinator,
    metrics: Arc<MetricsRecorder>,
    started: AtomicBool,
    created_at: Instant,
}

impl LiveHub {
    pub fn new(
        config: LiveConfig,
        store: Arc<dyn ReadingStore>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let registry = Arc::new(ClientRegistry::new(shutdown.token(), Arc::clone(&metrics)));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            config.aggregate_by_asset,
        ));
        Self {
            config,
            store,
            registry,
            dispatcher,
            shutdown,
            metrics,
            started: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    /// Start the configured change source. Call once.
    pub fn start(&self) -> Result<(), HubError> {
        if self.shutdown.is_shutting_down() {
            return Err(HubError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(HubError::AlreadyStarted);
        }

        let source: Box<dyn ChangeSource> = match self.config.strategy {
            SourceStrategy::Poll => Box::new(Poller::new(
                Arc::clone(&self.store),
                self.config.poller(),
                Utc::now(),
            )),
            SourceStrategy::Feed => {
                let delay = self.config.resubscribe_delay();
                match ChangeFeed::subscribe(Arc::clone(&self.store), delay) {
                    Ok(feed) => Box::new(feed),
                    Err(e) => {
                        self.started.store(false, Ordering::Release);
                        return Err(e.into());
                    }
                }
            }
        };

        self.shutdown.tracker().spawn(run_source(
            source,
            Arc::clone(&self.dispatcher),
            self.shutdown.token(),
        ));
        info!(
            strategy = %self.config.strategy,
            aggregate_by_asset = self.config.aggregate_by_asset,
            "live hub started"
        );
        Ok(())
    }

    /// Admit an observer with a fixed subscription.
    ///
    /// The acknowledgement is the first frame on the returned stream,
    /// followed by the latest known reading of each subscribed sensor, then
    /// live data and heartbeats.
    pub async fn connect(&self, subscription: Subscription) -> Result<LiveConnection, HubError> {
        if self.shutdown.is_shutting_down() {
            return Err(HubError::ShuttingDown);
        }

        let (tx, rx) = mpsc::channel(self.config.sink_capacity.max(2));
        // Queued before registration so no live frame can precede it.
        if tx.try_send(Frame::Ack).is_err() {
            return Err(HubError::ShuttingDown);
        }

        let conn = self.registry.register(tx, subscription);
        if !conn.is_active() {
            return Err(HubError::ShuttingDown);
        }
        let id = conn.id();
        let stream = FrameStream::new(rx, Arc::clone(&self.registry), id);

        self.send_snapshot(&conn).await;

        let registry = Arc::clone(&self.registry);
        let interval = self.config.heartbeat_interval();
        let cancel = conn.cancel_token().clone();
        self.shutdown
            .tracker()
            .spawn(run_heartbeat(registry, id, interval, cancel));

        Ok(LiveConnection { id, stream })
    }

    /// Remove an observer explicitly. Same path as a transport disconnect.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.registry.remove(id, CloseReason::Disconnected)
    }

    /// Stop the change source and every connection, waiting up to
    /// `timeout` for background tasks. Returns whether they all finished.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!(connections = self.registry.count(), "live hub shutting down");
        self.shutdown.shutdown();
        let removed = self.registry.remove_all(CloseReason::Shutdown);
        debug!(removed, "connections closed for shutdown");
        self.shutdown.graceful_shutdown(timeout).await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<dyn ReadingStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn strategy(&self) -> SourceStrategy {
        self.config.strategy
    }

    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Best effort: failures are logged and the connection stays active.
    async fn send_snapshot(&self, conn: &Arc<Connection>) {
        let readings = match self.fetch_snapshot(conn.subscription()).await {
            Ok(readings) => readings,
            Err(e) => {
                warn!(
                    conn_id = %conn.id(),
                    error = %e,
                    "snapshot fetch failed, continuing without"
                );
                return;
            }
        };

        let total = readings.len();
        for (sent, reading) in readings.into_iter().enumerate() {
            let frame = match Frame::sensor(&ChangeEvent::from(reading)) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(conn_id = %conn.id(), error = %e, "failed to encode snapshot frame");
                    continue;
                }
            };
            match conn.send(frame) {
                Ok(()) => {}
                Err(SinkError::Full) => {
                    // The transport has not started draining yet; keep the
                    // connection and let live data take over.
                    warn!(conn_id = %conn.id(), sent, total, "snapshot truncated, buffer full");
                    return;
                }
                Err(SinkError::Closed) => {
                    self.registry.remove(conn.id(), CloseReason::SinkClosed);
                    return;
                }
            }
        }
        debug!(conn_id = %conn.id(), readings = total, "snapshot sent");
    }

    async fn fetch_snapshot(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<Reading>, StoreError> {
        if subscription.is_all() {
            return self.store.latest_readings().await;
        }

        let mut sensors: Vec<_> = subscription.iter().cloned().collect();
        sensors.sort();
        let mut readings = Vec::with_capacity(sensors.len());
        for sensor_id in &sensors {
            if let Some(reading) = self.store.latest_reading(sensor_id).await? {
                readings.push(reading);
            }
        }
        Ok(readings)
    }
}
