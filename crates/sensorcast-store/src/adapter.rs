use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use sensorcast_core::{AssetId, Reading, SensorId};

use crate::database::Database;
use crate::error::StoreError;
use crate::readings::ReadingRepo;

/// Live notification of persisted readings. Each subscriber sees every
/// insert made after it subscribed, unless it falls `capacity` behind.
pub type InsertFeed = broadcast::Receiver<Reading>;

/// Everything the live core asks of the persistence layer.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Readings with a timestamp strictly greater than `since`.
    async fn readings_since(&self, since: DateTime<Utc>) -> Result<Vec<Reading>, StoreError>;

    async fn latest_reading(&self, sensor_id: &SensorId) -> Result<Option<Reading>, StoreError>;

    /// Latest reading per sensor, across every sensor that has one.
    async fn latest_readings(&self) -> Result<Vec<Reading>, StoreError>;

    /// Persist a reading for a known sensor. Stores with an insert feed
    /// publish the committed reading to it.
    async fn insert_reading(
        &self,
        sensor_id: &SensorId,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Reading, StoreError>;

    fn subscribe_inserts(&self) -> Result<InsertFeed, StoreError>;

    async fn sensor_exists(&self, sensor_id: &SensorId) -> Result<bool, StoreError>;

    /// `None` when the asset is unknown.
    async fn asset_sensors(&self, asset_id: &AssetId)
        -> Result<Option<Vec<SensorId>>, StoreError>;
}

/// SQLite-backed store. Blocking queries run on the blocking pool; inserts
/// made through [`ReadingStore::insert_reading`] are published on the
/// insert feed after they commit. Rows written by other processes are only
/// seen by polling.
#[derive(Clone)]
pub struct SqliteReadingStore {
    repo: ReadingRepo,
    feed: broadcast::Sender<Reading>,
}

impl SqliteReadingStore {
    pub fn new(db: Database, feed_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity.max(1));
        Self {
            repo: ReadingRepo::new(db),
            feed,
        }
    }

    /// Synchronous access for seeding and administration.
    pub fn repo(&self) -> &ReadingRepo {
        &self.repo
    }

    pub fn feed_subscribers(&self) -> usize {
        self.feed.receiver_count()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&ReadingRepo) -> Result<T, StoreError> + Send + 'static,
    {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || f(&repo))
            .await
            .map_err(|e| StoreError::Database(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn readings_since(&self, since: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        let rows = self.blocking(move |repo| repo.readings_since(since)).await?;
        debug!(since = %since, count = rows.len(), "readings since");
        Ok(rows)
    }

    async fn latest_reading(&self, sensor_id: &SensorId) -> Result<Option<Reading>, StoreError> {
        let sensor_id = sensor_id.clone();
        self.blocking(move |repo| repo.latest_reading(&sensor_id)).await
    }

    async fn latest_readings(&self) -> Result<Vec<Reading>, StoreError> {
        self.blocking(|repo| repo.latest_readings()).await
    }

    async fn insert_reading(
        &self,
        sensor_id: &SensorId,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Reading, StoreError> {
        let sensor_id = sensor_id.clone();
        let reading = self
            .blocking(move |repo| repo.insert_reading(&sensor_id, value, timestamp))
            .await?;

        // No subscribers is not an error: nobody is listening yet.
        match self.feed.send(reading.clone()) {
            Ok(receivers) => {
                trace!(sensor_id = %reading.sensor_id, receivers, "insert published");
            }
            Err(_) => {
                trace!(sensor_id = %reading.sensor_id, "insert not published, no subscribers");
            }
        }
        Ok(reading)
    }

    fn subscribe_inserts(&self) -> Result<InsertFeed, StoreError> {
        Ok(self.feed.subscribe())
    }

    async fn sensor_exists(&self, sensor_id: &SensorId) -> Result<bool, StoreError> {
        let sensor_id = sensor_id.clone();
        self.blocking(move |repo| repo.sensor_exists(&sensor_id)).await
    }

    async fn asset_sensors(
        &self,
        asset_id: &AssetId,
    ) -> Result<Option<Vec<SensorId>>, StoreError> {
        let asset_id = asset_id.clone();
        self.blocking(move |repo| repo.asset_sensors(&asset_id)).await
    }
}
