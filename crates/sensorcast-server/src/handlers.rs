//! Live-stream HTTP handlers.
//!
//! Each endpoint resolves its subscription, admits the observer through the
//! hub and answers with a `text/event-stream` body fed by the connection's
//! frame stream. Unknown targets are rejected before a connection exists.
//! Readings are ingested through the same store the hub watches.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use sensorcast_core::{AssetId, ChangeEvent, SensorId, Subscription};
use sensorcast_live::{HubError, LiveConnection};
use sensorcast_store::StoreError;

use crate::health::health_check;
use crate::server::AppState;

/// `GET /api/live/sensors/{sensor_id}`
pub async fn live_sensor(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
) -> Response {
    let sensor_id = SensorId::from_raw(sensor_id);
    match state.hub.store().sensor_exists(&sensor_id).await {
        Ok(true) => {}
        Ok(false) => return error_response(StatusCode::NOT_FOUND, "Sensor not found"),
        Err(e) => {
            error!(sensor_id = %sensor_id, error = %e, "sensor lookup failed");
            return internal_error();
        }
    }
    open_stream(&state, Subscription::sensor(sensor_id)).await
}

/// `GET /api/live/assets/{asset_id}`
///
/// The asset's sensor set is resolved once, at connect time.
pub async fn live_asset(State(state): State<AppState>, Path(asset_id): Path<String>) -> Response {
    let asset_id = AssetId::from_raw(asset_id);
    let sensors = match state.hub.store().asset_sensors(&asset_id).await {
        Ok(Some(sensors)) => sensors,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Asset not found"),
        Err(e) => {
            error!(asset_id = %asset_id, error = %e, "asset lookup failed");
            return internal_error();
        }
    };
    // An empty set would subscribe to every sensor.
    if sensors.is_empty() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "Asset has no sensors");
    }
    open_stream(&state, Subscription::sensors(sensors)).await
}

/// `GET /api/live/all`
pub async fn live_all(State(state): State<AppState>) -> Response {
    open_stream(&state, Subscription::all()).await
}

/// Body of `POST /api/sensors/{sensor_id}/values`.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub value: f64,
    /// Time of receipt when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `POST /api/sensors/{sensor_id}/values`
///
/// The committed reading is what live observers receive: the change feed
/// publishes it directly and the poller finds it on its next cycle.
pub async fn ingest_reading(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
    Json(req): Json<IngestRequest>,
) -> Response {
    if state.hub.is_shutting_down() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Server shutting down");
    }
    let sensor_id = SensorId::from_raw(sensor_id);
    let timestamp = req.timestamp.unwrap_or_else(Utc::now);

    match state.hub.store().insert_reading(&sensor_id, req.value, timestamp).await {
        Ok(reading) => {
            debug!(sensor_id = %sensor_id, value = reading.value, "reading ingested");
            let body = json!({
                "success": true,
                "reading": ChangeEvent::from(reading).to_update(),
            });
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(StoreError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, "Sensor not found"),
        Err(e) => {
            error!(sensor_id = %sensor_id, error = %e, "reading insert failed");
            internal_error()
        }
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    let body = health_check(&state.hub);
    let status = if state.hub.is_shutting_down() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body)).into_response()
}

async fn open_stream(state: &AppState, subscription: Subscription) -> Response {
    let sensors = subscription.len();
    match state.hub.connect(subscription).await {
        Ok(conn) => {
            info!(conn_id = %conn.id, sensors, "live stream opened");
            event_stream(conn)
        }
        Err(HubError::ShuttingDown) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Server shutting down")
        }
        Err(e) => {
            warn!(error = %e, error_kind = e.error_kind(), "failed to open live stream");
            internal_error()
        }
    }
}

/// Dropping the body (client gone) drops the frame stream, which removes
/// the connection.
fn event_stream(conn: LiveConnection) -> Response {
    let body = Body::from_stream(
        conn.stream
            .map(|frame| Ok::<_, Infallible>(frame.encode())),
    );
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

fn internal_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_shape() {
        let resp = error_response(StatusCode::NOT_FOUND, "Sensor not found");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_error_is_500() {
        assert_eq!(internal_error().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
