use std::sync::Arc;

use crate::ids::AssetId;
use crate::reading::{AssetUpdate, ChangeEvent, SensorUpdate};

/// Reserved payload of the acknowledgement frame.
pub const ACK_MARKER: &str = ":ok";
/// Reserved payload of the keep-alive frame.
pub const PING_MARKER: &str = ":ping";

/// A unit written to an observer's stream.
///
/// Data payloads are serialized once per fan-out pass and shared between
/// every recipient, so cloning a frame is a refcount bump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Sent once when the stream opens, before any snapshot data.
    Ack,
    /// Keep-alive, sent on the heartbeat cadence.
    Ping,
    /// Serialized JSON object.
    Data(Arc<str>),
}

impl Frame {
    pub fn sensor(event: &ChangeEvent) -> Result<Self, serde_json::Error> {
        Self::sensor_update(&event.to_update())
    }

    pub fn sensor_update(update: &SensorUpdate) -> Result<Self, serde_json::Error> {
        serde_json::to_string(update).map(|json| Self::Data(json.into()))
    }

    pub fn asset(asset_id: &AssetId, events: &[&ChangeEvent]) -> Result<Self, serde_json::Error> {
        let update = AssetUpdate {
            asset_id: asset_id.clone(),
            sensors: events.iter().map(|e| e.to_update()).collect(),
        };
        serde_json::to_string(&update).map(|json| Self::Data(json.into()))
    }

    pub fn payload(&self) -> &str {
        match self {
            Self::Ack => ACK_MARKER,
            Self::Ping => PING_MARKER,
            Self::Data(json) => json,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    /// Event-stream encoding: `data: <payload>\n\n`.
    pub fn encode(&self) -> String {
        format!("data: {}\n\n", self.payload())
    }

    /// Inverse of [`Frame::encode`] for a single frame. Returns `None` for
    /// anything that is not a `data:` frame.
    pub fn decode(raw: &str) -> Option<Self> {
        let payload = raw.trim_end_matches('\n').strip_prefix("data: ")?;
        Some(match payload {
            ACK_MARKER => Self::Ack,
            PING_MARKER => Self::Ping,
            json => Self::Data(json.into()),
        })
    }

    /// Parse the data payload as JSON. Markers yield `None`.
    pub fn json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Data(json) => serde_json::from_str(json).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::SensorPayload;
    use chrono::Utc;

    fn event(sensor: &str, value: f64) -> ChangeEvent {
        ChangeEvent::new(
            sensor.into(),
            SensorPayload { value, timestamp: Utc::now(), unit: None },
        )
    }

    #[test]
    fn markers_encode_as_reserved_payloads() {
        assert_eq!(Frame::Ack.encode(), "data: :ok\n\n");
        assert_eq!(Frame::Ping.encode(), "data: :ping\n\n");
    }

    #[test]
    fn data_frame_encodes_json() {
        let frame = Frame::sensor(&event("S1", 42.0)).unwrap();
        let encoded = frame.encode();
        assert!(encoded.starts_with("data: {"));
        assert!(encoded.ends_with("}\n\n"));
        let json = frame.json().unwrap();
        assert_eq!(json["sensorId"], "S1");
        assert_eq!(json["value"], 42.0);
    }

    #[test]
    fn decode_inverts_encode() {
        for frame in [Frame::Ack, Frame::Ping, Frame::sensor(&event("S2", 1.0)).unwrap()] {
            assert_eq!(Frame::decode(&frame.encode()), Some(frame));
        }
    }

    #[test]
    fn decode_rejects_non_data_lines() {
        assert_eq!(Frame::decode(": comment\n\n"), None);
        assert_eq!(Frame::decode("event: x"), None);
    }

    #[test]
    fn asset_frame_groups_sensors() {
        let a = event("S1", 1.0);
        let b = event("S2", 2.0);
        let frame = Frame::asset(&"A1".into(), &[&a, &b]).unwrap();
        let json = frame.json().unwrap();
        assert_eq!(json["assetId"], "A1");
        assert_eq!(json["sensors"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn markers_are_not_data() {
        assert!(!Frame::Ack.is_data());
        assert!(!Frame::Ping.is_data());
        assert!(Frame::Ping.json().is_none());
    }
}
