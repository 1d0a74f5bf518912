//! Change detection: turns persisted readings into batches of
//! [`ChangeEvent`]s for the dispatcher.

mod feed;
mod poller;

pub use feed::ChangeFeed;
pub use poller::{Poller, PollerConfig};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensorcast_core::{ChangeEvent, SourceError};

use crate::dispatcher::Dispatcher;
use crate::metrics::{SOURCE_BATCHES, SOURCE_ERRORS};

/// Which change-detection strategy a deployment runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStrategy {
    #[default]
    Poll,
    Feed,
}

impl SourceStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Feed => "feed",
        }
    }
}

impl fmt::Display for SourceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" => Ok(Self::Poll),
            "feed" | "changefeed" | "change_feed" => Ok(Self::Feed),
            other => Err(format!("unknown source strategy: {other}")),
        }
    }
}

/// A producer of change batches. Each call waits for the next batch; an
/// error means that one batch (or notification) was skipped and the
/// source stays usable.
#[async_trait]
pub trait ChangeSource: Send {
    fn strategy(&self) -> SourceStrategy;

    async fn next_batch(&mut self) -> Result<Vec<ChangeEvent>, SourceError>;
}

/// Pump batches from `source` into `dispatcher` until `cancel` fires.
pub async fn run_source(
    mut source: Box<dyn ChangeSource>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    let strategy = source.strategy();
    let metrics = Arc::clone(dispatcher.metrics());
    info!(%strategy, "change source started");

    loop {
        let batch = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            batch = source.next_batch() => batch,
        };

        match batch {
            Ok(events) => {
                metrics.counter_inc(SOURCE_BATCHES, &[("strategy", strategy.as_str())], 1);
                if events.is_empty() {
                    continue;
                }
                let count = events.len();
                let report = dispatcher.dispatch_cycle(events);
                debug!(
                    %strategy,
                    events = count,
                    delivered = report.delivered,
                    evicted = report.evicted,
                    "batch dispatched"
                );
            }
            Err(e) => {
                metrics.counter_inc(SOURCE_ERRORS, &[("kind", e.error_kind())], 1);
                warn!(
                    %strategy,
                    error_kind = e.error_kind(),
                    may_lose_events = e.may_lose_events(),
                    error = %e,
                    "change source error, skipping"
                );
            }
        }
    }

    info!(%strategy, "change source stopped");
}
