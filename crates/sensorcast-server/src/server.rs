use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use sensorcast_live::{LiveHub, SourceStrategy};
use sensorcast_store::ReadingStore;
use sensorcast_telemetry::MetricsRecorder;

use crate::config::Settings;
use crate::error::ServerError;
use crate::handlers;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<LiveHub>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/live/sensors/{sensor_id}", get(handlers::live_sensor))
        .route("/api/live/assets/{asset_id}", get(handlers::live_asset))
        .route("/api/live/all", get(handlers::live_all))
        .route("/api/sensors/{sensor_id}/values", post(handlers::ingest_reading))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Build the live hub, start its change source and serve HTTP.
pub async fn start(
    settings: &Settings,
    store: Arc<dyn ReadingStore>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, ServerError> {
    let addr = settings.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
    let local_addr = listener.local_addr()?;

    let hub = Arc::new(LiveHub::new(settings.live.clone(), store, metrics));
    hub.start()?;
    let router = build_router(AppState { hub: Arc::clone(&hub) });

    info!(
        addr = %local_addr,
        strategy = %hub.strategy(),
        "sensorcast server started"
    );
    if hub.strategy() == SourceStrategy::Feed {
        info!("change feed sees readings posted to /api/sensors/{{sensor_id}}/values only");
    }

    let stop = CancellationToken::new();
    let stop_signal = stop.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { stop_signal.cancelled().await })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "http server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        local_addr,
        hub,
        stop,
        server,
        shutdown_timeout: settings.live.shutdown_timeout(),
    })
}

/// Handle returned by [`start`]. Keeps the server running until
/// [`ServerHandle::shutdown`].
pub struct ServerHandle {
    pub port: u16,
    pub local_addr: SocketAddr,
    hub: Arc<LiveHub>,
    stop: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    /// Close every live stream, stop background tasks, then stop accepting
    /// requests. Streams are closed first so in-flight responses can end.
    pub async fn shutdown(self) {
        let drained = self.hub.shutdown(self.shutdown_timeout).await;
        self.stop.cancel();
        if tokio::time::timeout(self.shutdown_timeout, self.server).await.is_err() {
            warn!("http server did not stop within {:?}", self.shutdown_timeout);
        }
        info!(drained, "sensorcast server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorcast_store::{Database, SqliteReadingStore};

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        settings
    }

    #[tokio::test]
    async fn server_starts_on_ephemeral_port() {
        let store = Arc::new(SqliteReadingStore::new(Database::in_memory().unwrap(), 8));
        let handle = start(&settings(), store, Arc::new(MetricsRecorder::new()))
            .await
            .unwrap();
        assert!(handle.port > 0);
        assert_eq!(handle.hub().connection_count(), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn health_endpoint() {
        let store = Arc::new(SqliteReadingStore::new(Database::in_memory().unwrap(), 8));
        let handle = start(&settings(), store, Arc::new(MetricsRecorder::new()))
            .await
            .unwrap();

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["strategy"], "poll");
        assert_eq!(body["connections"], 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut settings = settings();
        settings.server.port = first.local_addr().unwrap().port();

        let store = Arc::new(SqliteReadingStore::new(Database::in_memory().unwrap(), 8));
        let err = start(&settings, store, Arc::new(MetricsRecorder::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
