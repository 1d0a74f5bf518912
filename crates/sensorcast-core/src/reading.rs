use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AssetId, SensorId};

/// A persisted sensor reading, as reported by the store.
/// Immutable once observed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: SensorId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub unit: Option<String>,
    /// Asset owning the sensor, when the store knows it.
    pub asset_id: Option<AssetId>,
}

/// The part of a reading that travels to observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorPayload {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub unit: Option<String>,
}

/// Unit of work consumed by the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub sensor_id: SensorId,
    pub asset_id: Option<AssetId>,
    pub payload: SensorPayload,
}

impl ChangeEvent {
    pub fn new(sensor_id: SensorId, payload: SensorPayload) -> Self {
        Self {
            sensor_id,
            asset_id: None,
            payload,
        }
    }

    pub fn with_asset(mut self, asset_id: AssetId) -> Self {
        self.asset_id = Some(asset_id);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.payload.timestamp
    }

    /// Wire shape of this event for a sensor-scoped frame.
    pub fn to_update(&self) -> SensorUpdate {
        SensorUpdate {
            sensor_id: self.sensor_id.clone(),
            value: self.payload.value,
            timestamp: self.payload.timestamp,
            unit: self.payload.unit.clone(),
        }
    }
}

impl From<Reading> for ChangeEvent {
    fn from(r: Reading) -> Self {
        Self {
            sensor_id: r.sensor_id,
            asset_id: r.asset_id,
            payload: SensorPayload {
                value: r.value,
                timestamp: r.timestamp,
                unit: r.unit,
            },
        }
    }
}

/// JSON body of a sensor data frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorUpdate {
    pub sensor_id: SensorId,
    pub value: f64,
    #[serde(with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// JSON body of an asset-scoped data frame: one entry per sensor that
/// changed in the cycle and is visible to the receiving connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetUpdate {
    pub asset_id: AssetId,
    pub sensors: Vec<SensorUpdate>,
}

/// Timestamps go out as RFC 3339 UTC with millisecond precision
/// (`2024-05-01T12:00:00.000Z`), the format browser clients parse natively.
pub mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
