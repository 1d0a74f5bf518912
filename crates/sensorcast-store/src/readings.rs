use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::instrument;

use sensorcast_core::{AssetId, Reading, SensorId};

use crate::database::Database;
use crate::error::StoreError;

const READING_COLUMNS: &str = "v.sensor_id, v.value, v.ts_us, s.unit, s.asset_id";

/// Synchronous repository over assets, sensors and their readings.
#[derive(Clone)]
pub struct ReadingRepo {
    db: Database,
}

impl ReadingRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create_asset(&self, id: &AssetId, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO assets (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), name, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn create_sensor(
        &self,
        id: &SensorId,
        asset_id: Option<&AssetId>,
        name: &str,
        unit: Option<&str>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sensors (id, asset_id, name, unit, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    asset_id.map(AssetId::as_str),
                    name,
                    unit,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    /// Persist one reading and return it joined with its sensor metadata.
    #[instrument(skip(self), fields(sensor_id = %sensor_id))]
    pub fn insert_reading(
        &self,
        sensor_id: &SensorId,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Reading, StoreError> {
        self.db.with_conn(|conn| {
            let meta: Option<(Option<String>, Option<String>)> = conn
                .query_row(
                    "SELECT unit, asset_id FROM sensors WHERE id = ?1",
                    [sensor_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (unit, asset_id) =
                meta.ok_or_else(|| StoreError::NotFound(format!("sensor {sensor_id}")))?;

            conn.execute(
                "INSERT INTO sensor_values (sensor_id, value, ts_us) VALUES (?1, ?2, ?3)",
                params![sensor_id.as_str(), value, timestamp.timestamp_micros()],
            )?;

            Ok(Reading {
                sensor_id: sensor_id.clone(),
                value,
                timestamp,
                unit,
                asset_id: asset_id.map(AssetId::from_raw),
            })
        })
    }

    /// Every reading with a timestamp strictly after `since`, oldest first.
    pub fn readings_since(&self, since: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {READING_COLUMNS} FROM sensor_values v
                 LEFT JOIN sensors s ON s.id = v.sensor_id
                 WHERE v.ts_us > ?1
                 ORDER BY v.ts_us, v.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([since.timestamp_micros()], raw_reading)?;
            rows.map(|r| r.map_err(StoreError::from).and_then(RawReading::into_reading))
                .collect()
        })
    }

    pub fn latest_reading(&self, sensor_id: &SensorId) -> Result<Option<Reading>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {READING_COLUMNS} FROM sensor_values v
                 LEFT JOIN sensors s ON s.id = v.sensor_id
                 WHERE v.sensor_id = ?1
                 ORDER BY v.ts_us DESC, v.id DESC
                 LIMIT 1"
            );
            conn.query_row(&sql, [sensor_id.as_str()], raw_reading)
                .optional()?
                .map(RawReading::into_reading)
                .transpose()
        })
    }

    /// Latest reading of every sensor that has one.
    pub fn latest_readings(&self) -> Result<Vec<Reading>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {READING_COLUMNS} FROM sensors s
                 JOIN sensor_values v ON v.id = (
                     SELECT id FROM sensor_values
                     WHERE sensor_id = s.id
                     ORDER BY ts_us DESC, id DESC
                     LIMIT 1
                 )
                 ORDER BY s.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], raw_reading)?;
            rows.map(|r| r.map_err(StoreError::from).and_then(RawReading::into_reading))
                .collect()
        })
    }

    pub fn sensor_exists(&self, sensor_id: &SensorId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM sensors WHERE id = ?1", [sensor_id.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Sensor ids attached to an asset, or `None` if the asset is unknown.
    pub fn asset_sensors(&self, asset_id: &AssetId) -> Result<Option<Vec<SensorId>>, StoreError> {
        self.db.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM assets WHERE id = ?1", [asset_id.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let mut stmt = conn.prepare("SELECT id FROM sensors WHERE asset_id = ?1 ORDER BY id")?;
            let ids = stmt
                .query_map([asset_id.as_str()], |row| row.get::<_, String>(0))?
                .map(|r| r.map(SensorId::from_raw))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(ids))
        })
    }
}

/// Column values as read, before timestamp validation.
struct RawReading {
    sensor_id: String,
    value: f64,
    ts_us: i64,
    unit: Option<String>,
    asset_id: Option<String>,
}

fn raw_reading(row: &Row<'_>) -> rusqlite::Result<RawReading> {
    Ok(RawReading {
        sensor_id: row.get(0)?,
        value: row.get(1)?,
        ts_us: row.get(2)?,
        unit: row.get(3)?,
        asset_id: row.get(4)?,
    })
}

impl RawReading {
    fn into_reading(self) -> Result<Reading, StoreError> {
        let timestamp = DateTime::<Utc>::from_timestamp_micros(self.ts_us).ok_or_else(|| {
            StoreError::CorruptRow {
                table: "sensor_values",
                column: "ts_us",
                detail: format!("out of range: {}", self.ts_us),
            }
        })?;
        Ok(Reading {
            sensor_id: SensorId::from_raw(self.sensor_id),
            value: self.value,
            timestamp,
            unit: self.unit,
            asset_id: self.asset_id.map(AssetId::from_raw),
        })
    }
}
