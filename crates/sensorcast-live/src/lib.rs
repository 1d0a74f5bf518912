//! Live fan-out of sensor readings to subscribed observers.
//!
//! A [`LiveHub`] owns the [`ClientRegistry`], the [`Dispatcher`], one change
//! source (poll-and-diff or insert feed) and a heartbeat task per connection.
//! Transports call [`LiveHub::connect`] and write out the returned
//! [`FrameStream`].

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod shutdown;
pub mod source;
pub mod stream;

pub use config::LiveConfig;
pub use connection::{CloseReason, Connection, ConnectionState, SinkError};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::HubError;
pub use heartbeat::{run_heartbeat, HeartbeatResult};
pub use hub::{LiveConnection, LiveHub};
pub use registry::ClientRegistry;
pub use shutdown::ShutdownCoordinator;
pub use source::{run_source, ChangeFeed, ChangeSource, Poller, PollerConfig, SourceStrategy};
pub use stream::FrameStream;
