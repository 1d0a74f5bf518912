use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

use sensorcast_core::{ChangeEvent, Reading, SensorId, SourceError};
use sensorcast_store::ReadingStore;

use super::{ChangeSource, SourceStrategy};

#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub interval: Duration,
    /// How far behind the watermark each query reaches. Zero queries
    /// strictly after the previous cycle start.
    pub safety_overlap: Duration,
    pub query_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            safety_overlap: Duration::ZERO,
            query_timeout: Duration::from_secs(5),
        }
    }
}

/// Poll-and-diff change detection against a timestamp watermark.
///
/// Each cycle reads everything newer than the watermark, keeps the newest
/// reading per sensor, and moves the watermark to the cycle's start time.
/// A failed query leaves the watermark in place so the next cycle covers
/// the same window again.
pub struct Poller {
    store: Arc<dyn ReadingStore>,
    config: PollerConfig,
    last_poll_time: DateTime<Utc>,
    /// Newest timestamp emitted per sensor. Only consulted with a non-zero
    /// overlap, where windows intersect.
    last_emitted: HashMap<SensorId, DateTime<Utc>>,
    ticker: Option<Interval>,
}

impl Poller {
    pub fn new(store: Arc<dyn ReadingStore>, config: PollerConfig, start: DateTime<Utc>) -> Self {
        Self {
            store,
            config,
            last_poll_time: start,
            last_emitted: HashMap::new(),
            ticker: None,
        }
    }

    pub fn last_poll_time(&self) -> DateTime<Utc> {
        self.last_poll_time
    }

    /// Run one detection cycle as if it started at `cycle_start`.
    pub async fn poll_cycle(
        &mut self,
        cycle_start: DateTime<Utc>,
    ) -> Result<Vec<ChangeEvent>, SourceError> {
        let overlap = chrono::Duration::from_std(self.config.safety_overlap)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let since = self.last_poll_time - overlap;

        let readings = time::timeout(self.config.query_timeout, self.store.readings_since(since))
            .await
            .map_err(|_| SourceError::Timeout(self.config.query_timeout))?
            .map_err(SourceError::from)?;

        let fetched = readings.len();
        let events = self.collapse(readings);
        self.last_poll_time = cycle_start;

        if !events.is_empty() {
            debug!(
                since = %since,
                fetched,
                sensors = events.len(),
                "poll cycle detected changes"
            );
        } else {
            trace!(since = %since, "poll cycle found nothing");
        }
        Ok(events)
    }

    /// Newest reading per sensor, minus anything already emitted.
    fn collapse(&mut self, readings: Vec<Reading>) -> Vec<ChangeEvent> {
        let mut newest: BTreeMap<SensorId, Reading> = BTreeMap::new();
        for reading in readings {
            match newest.get(&reading.sensor_id) {
                Some(kept) if kept.timestamp > reading.timestamp => {}
                _ => {
                    newest.insert(reading.sensor_id.clone(), reading);
                }
            }
        }

        let dedupe = !self.config.safety_overlap.is_zero();
        newest
            .into_values()
            .filter(|reading| {
                if !dedupe {
                    return true;
                }
                match self.last_emitted.get(&reading.sensor_id) {
                    Some(prev) if reading.timestamp <= *prev => false,
                    _ => {
                        self.last_emitted
                            .insert(reading.sensor_id.clone(), reading.timestamp);
                        true
                    }
                }
            })
            .map(ChangeEvent::from)
            .collect()
    }
}

#[async_trait]
impl ChangeSource for Poller {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::Poll
    }

    async fn next_batch(&mut self) -> Result<Vec<ChangeEvent>, SourceError> {
        let period = self.config.interval;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ticker.tick().await;
        self.poll_cycle(Utc::now()).await
    }
}
