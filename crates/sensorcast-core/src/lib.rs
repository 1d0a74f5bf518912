pub mod errors;
pub mod frame;
pub mod ids;
pub mod reading;
pub mod subscription;

pub use errors::SourceError;
pub use frame::Frame;
pub use ids::{AssetId, ConnectionId, SensorId};
pub use reading::{AssetUpdate, ChangeEvent, Reading, SensorPayload, SensorUpdate};
pub use subscription::Subscription;
