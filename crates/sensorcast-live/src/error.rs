use sensorcast_core::SourceError;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("live hub is shutting down")]
    ShuttingDown,

    #[error("live hub already started")]
    AlreadyStarted,

    #[error("change source: {0}")]
    Source(#[from] SourceError),
}

impl HubError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ShuttingDown => "shutting_down",
            Self::AlreadyStarted => "already_started",
            Self::Source(e) => e.error_kind(),
        }
    }
}
