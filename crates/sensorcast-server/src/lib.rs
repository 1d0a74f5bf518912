pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod loader;
pub mod server;

pub use config::{ServerConfig, Settings, StoreConfig, TelemetrySettings};
pub use error::{ServerError, SettingsError};
pub use loader::{load_settings_from_path, LoadedSettings, RejectedEnvVar};
pub use server::{build_router, start, AppState, ServerHandle};
