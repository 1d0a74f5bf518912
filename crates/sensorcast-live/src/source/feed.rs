use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use sensorcast_core::{ChangeEvent, SourceError};
use sensorcast_store::{InsertFeed, ReadingStore};

use super::{ChangeSource, SourceStrategy};

/// Push-based change detection: one event per persisted reading, no
/// collapsing.
pub struct ChangeFeed {
    store: Arc<dyn ReadingStore>,
    feed: Option<InsertFeed>,
    resubscribe_delay: Duration,
    /// Set after a failure so the next attempt waits before resubscribing.
    backoff: bool,
}

impl ChangeFeed {
    /// Subscribe immediately, so inserts made after this call are seen.
    pub fn subscribe(
        store: Arc<dyn ReadingStore>,
        resubscribe_delay: Duration,
    ) -> Result<Self, SourceError> {
        let feed = store.subscribe_inserts()?;
        Ok(Self {
            store,
            feed: Some(feed),
            resubscribe_delay,
            backoff: false,
        })
    }

    pub fn is_subscribed(&self) -> bool {
        self.feed.is_some()
    }

    async fn ensure_subscribed(&mut self) -> Result<&mut InsertFeed, SourceError> {
        if self.feed.is_none() {
            if self.backoff {
                tokio::time::sleep(self.resubscribe_delay).await;
            }
            match self.store.subscribe_inserts() {
                Ok(feed) => {
                    info!("insert feed resubscribed");
                    self.backoff = false;
                    self.feed = Some(feed);
                }
                Err(e) => {
                    self.backoff = true;
                    return Err(e.into());
                }
            }
        }
        self.feed
            .as_mut()
            .ok_or_else(|| SourceError::Unavailable("no insert feed".into()))
    }
}

#[async_trait]
impl ChangeSource for ChangeFeed {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::Feed
    }

    async fn next_batch(&mut self) -> Result<Vec<ChangeEvent>, SourceError> {
        let feed = self.ensure_subscribed().await?;
        match feed.recv().await {
            Ok(reading) => Ok(vec![ChangeEvent::from(reading)]),
            Err(RecvError::Lagged(skipped)) => Err(SourceError::Lagged(skipped)),
            Err(RecvError::Closed) => {
                self.feed = None;
                self.backoff = true;
                Err(SourceError::FeedClosed)
            }
        }
    }
}
