use std::time::Duration;

/// Failures surfaced by a change source. Every variant is recoverable:
/// the source skips the cycle (or notification) and carries on.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SourceError {
    #[error("reading query failed: {0}")]
    Query(String),
    #[error("insert feed lagged, {0} notifications skipped")]
    Lagged(u64),
    #[error("insert feed closed")]
    FeedClosed,
    #[error("insert feed unavailable: {0}")]
    Unavailable(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl SourceError {
    /// Whether the change feed has to be re-established before the next
    /// notification can arrive.
    pub fn needs_resubscribe(&self) -> bool {
        matches!(self, Self::FeedClosed | Self::Unavailable(_))
    }

    /// Whether detected changes may have been lost. Poll failures retry the
    /// same window, so they lose nothing.
    pub fn may_lose_events(&self) -> bool {
        matches!(self, Self::Lagged(_) | Self::FeedClosed | Self::Unavailable(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Lagged(_) => "lagged",
            Self::FeedClosed => "feed_closed",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
        }
    }
}
