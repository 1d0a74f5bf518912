//! Settings types. Loading lives in [`crate::loader`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Level;

use sensorcast_live::LiveConfig;
use sensorcast_telemetry::{parse_level, TelemetryConfig};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server: ServerConfig,
    pub live: LiveConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetrySettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// `~` expands to `$HOME`.
    pub db_path: String,
    /// Buffered insert notifications per feed subscriber.
    pub feed_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.sensorcast/readings.db".into(),
            feed_capacity: 1024,
        }
    }
}

impl StoreConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        match self.db_path.strip_prefix("~/") {
            Some(rest) => home_dir().join(rest),
            None if self.db_path == "~" => home_dir(),
            None => PathBuf::from(&self.db_path),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    pub level: String,
    pub json: bool,
    /// Per-module overrides, e.g. `{"sensorcast_live": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: true,
            modules: BTreeMap::new(),
        }
    }
}

impl TelemetrySettings {
    /// Unparseable levels fall back to `info` (global) or are skipped
    /// (per module).
    pub fn to_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: parse_level(&self.level).unwrap_or(Level::INFO),
            module_levels: self
                .modules
                .iter()
                .filter_map(|(module, level)| parse_level(level).map(|l| (module.clone(), l)))
                .collect(),
            json: self.json,
        }
    }
}
