use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;

use sensorcast_core::Frame;
use sensorcast_live::SourceStrategy;
use sensorcast_server::{start, ServerHandle, Settings};
use sensorcast_store::{Database, ReadingStore, SqliteReadingStore};
use sensorcast_telemetry::MetricsRecorder;

async fn boot(strategy: SourceStrategy) -> (ServerHandle, Arc<SqliteReadingStore>) {
    let store = SqliteReadingStore::new(Database::in_memory().unwrap(), 64);
    store.repo().create_asset(&"A1".into(), "boiler").unwrap();
    store.repo().create_asset(&"EMPTY".into(), "spare rack").unwrap();
    store
        .repo()
        .create_sensor(&"S1".into(), Some(&"A1".into()), "temp", Some("C"))
        .unwrap();
    store
        .repo()
        .create_sensor(&"S2".into(), Some(&"A1".into()), "pressure", Some("bar"))
        .unwrap();
    let store = Arc::new(store);

    let mut settings = Settings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    settings.live.strategy = strategy;
    settings.live.poll_interval_ms = 50;
    settings.live.shutdown_timeout_secs = 2;
    settings.live.heartbeat_interval_secs = 1;

    let handle = start(&settings, store.clone(), Arc::new(MetricsRecorder::new()))
        .await
        .unwrap();
    (handle, store)
}

/// Reads an event-stream body frame by frame.
struct FrameReader {
    body: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buf: String,
}

impl FrameReader {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            body: resp.bytes_stream().boxed(),
            buf: String::new(),
        }
    }

    async fn next(&mut self) -> Frame {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let raw: String = self.buf.drain(..end + 2).collect();
                return Frame::decode(&raw).expect("malformed frame");
            }
            let chunk = tokio::time::timeout(Duration::from_secs(3), self.body.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("body error");
            self.buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    async fn next_data(&mut self) -> serde_json::Value {
        loop {
            if let Some(json) = self.next().await.json() {
                return json;
            }
        }
    }
}

#[tokio::test]
async fn sensor_stream_acks_then_delivers() {
    let (handle, store) = boot(SourceStrategy::Feed).await;
    let url = format!("http://127.0.0.1:{}/api/live/sensors/S1", handle.port);

    let resp = reqwest::Client::new()
        .get(&url)
        .header("origin", "http://dashboard.local")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert_eq!(resp.headers()["cache-control"], "no-cache");
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");

    let mut reader = FrameReader::new(resp);
    assert_eq!(reader.next().await, Frame::Ack);

    store.insert_reading(&"S2".into(), 1.0, Utc::now()).await.unwrap();
    store.insert_reading(&"S1".into(), 42.0, Utc::now()).await.unwrap();

    let got = reader.next_data().await;
    assert_eq!(got["sensorId"], "S1");
    assert_eq!(got["value"], 42.0);
    assert_eq!(got["unit"], "C");

    handle.shutdown().await;
}

#[tokio::test]
async fn snapshot_follows_ack() {
    let (handle, store) = boot(SourceStrategy::Poll).await;
    store.insert_reading(&"S2".into(), 3.0, Utc::now()).await.unwrap();

    let url = format!("http://127.0.0.1:{}/api/live/assets/A1", handle.port);
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), 200);

    let mut reader = FrameReader::new(resp);
    assert_eq!(reader.next().await, Frame::Ack);
    let snapshot = reader.next_data().await;
    assert_eq!(snapshot["sensorId"], "S2");
    assert_eq!(snapshot["value"], 3.0);

    handle.shutdown().await;
}

#[tokio::test]
async fn match_all_stream_sees_polled_changes() {
    let (handle, store) = boot(SourceStrategy::Poll).await;
    let url = format!("http://127.0.0.1:{}/api/live/all", handle.port);

    let mut reader = FrameReader::new(reqwest::get(&url).await.unwrap());
    assert_eq!(reader.next().await, Frame::Ack);

    store.insert_reading(&"S2".into(), 8.5, Utc::now()).await.unwrap();
    let got = reader.next_data().await;
    assert_eq!(got["sensorId"], "S2");
    assert_eq!(got["value"], 8.5);

    handle.shutdown().await;
}

#[tokio::test]
async fn posted_reading_reaches_feed_stream() {
    let (handle, _store) = boot(SourceStrategy::Feed).await;
    let base = format!("http://127.0.0.1:{}", handle.port);
    let client = reqwest::Client::new();

    let live = client.get(format!("{base}/api/live/all")).send().await.unwrap();
    let mut reader = FrameReader::new(live);
    assert_eq!(reader.next().await, Frame::Ack);

    let resp = client
        .post(format!("{base}/api/sensors/S1/values"))
        .json(&serde_json::json!({ "value": 42.0, "timestamp": "2024-05-01T12:00:00.250Z" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["reading"]["sensorId"], "S1");

    let got = reader.next_data().await;
    assert_eq!(got["sensorId"], "S1");
    assert_eq!(got["value"], 42.0);
    assert_eq!(got["unit"], "C");
    assert_eq!(got["timestamp"], "2024-05-01T12:00:00.250Z");

    handle.shutdown().await;
}

#[tokio::test]
async fn posted_reading_reaches_poll_stream() {
    let (handle, _store) = boot(SourceStrategy::Poll).await;
    let base = format!("http://127.0.0.1:{}", handle.port);
    let client = reqwest::Client::new();

    let live = client.get(format!("{base}/api/live/sensors/S2")).send().await.unwrap();
    let mut reader = FrameReader::new(live);
    assert_eq!(reader.next().await, Frame::Ack);

    let resp = client
        .post(format!("{base}/api/sensors/S2/values"))
        .json(&serde_json::json!({ "value": 7.25 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let got = reader.next_data().await;
    assert_eq!(got["sensorId"], "S2");
    assert_eq!(got["value"], 7.25);

    handle.shutdown().await;
}

#[tokio::test]
async fn posting_to_unknown_sensor_is_404() {
    let (handle, store) = boot(SourceStrategy::Feed).await;
    let url = format!("http://127.0.0.1:{}/api/sensors/NOPE/values", handle.port);

    let resp = reqwest::Client::new()
        .post(&url)
        .json(&serde_json::json!({ "value": 1.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Sensor not found");
    assert!(store.latest_readings().await.unwrap().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_targets_are_404() {
    let (handle, _store) = boot(SourceStrategy::Poll).await;
    let base = format!("http://127.0.0.1:{}", handle.port);

    let resp = reqwest::get(format!("{base}/api/live/sensors/NOPE")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Sensor not found");

    let resp = reqwest::get(format!("{base}/api/live/assets/NOPE")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Asset not found");

    let resp = reqwest::get(format!("{base}/api/live/assets/EMPTY")).await.unwrap();
    assert_eq!(resp.status(), 422);

    assert_eq!(handle.hub().connection_count(), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn client_disconnect_removes_connection() {
    let (handle, _store) = boot(SourceStrategy::Poll).await;
    let url = format!("http://127.0.0.1:{}/api/live/all", handle.port);

    let mut reader = FrameReader::new(reqwest::get(&url).await.unwrap());
    assert_eq!(reader.next().await, Frame::Ack);
    assert_eq!(handle.hub().connection_count(), 1);
    drop(reader);

    // Noticed at the latest when a heartbeat write hits the closed socket.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.hub().connection_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "connection was not removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    handle.shutdown().await;
}
