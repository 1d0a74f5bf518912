//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If a settings file exists, deep-merge its values over the defaults
//! 3. Apply `SENSORCAST_*` environment overrides
//!
//! Command-line flags are applied by the binary on top of the result.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use sensorcast_live::SourceStrategy;

use crate::config::Settings;
use crate::error::SettingsError;

/// `~/.sensorcast/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sensorcast").join("settings.json")
}

/// An environment override that did not parse and was ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedEnvVar {
    pub key: String,
    pub value: String,
    pub expected: &'static str,
}

/// Loaded settings plus the overrides that were ignored on the way.
///
/// Settings are loaded before logging is configured, so rejections are
/// collected here and reported by the caller once a subscriber exists.
#[derive(Clone, Debug)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub rejected: Vec<RejectedEnvVar>,
}

impl LoadedSettings {
    pub fn log_rejected(&self) {
        for r in &self.rejected {
            warn!(
                key = %r.key,
                value = %r.value,
                expected = r.expected,
                "invalid env var, ignoring"
            );
        }
    }
}

/// Load settings from `path` with env var overrides. A missing file yields
/// the defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LoadedSettings, SettingsError> {
    let mut settings = load_file(path)?;
    let rejected = apply_env_overrides(&mut settings);
    Ok(LoadedSettings { settings, rejected })
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn load_file(path: &Path) -> Result<Settings, SettingsError> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        if !user.is_object() {
            return Err(SettingsError::InvalidValue(
                "settings file must contain a JSON object".into(),
            ));
        }
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SENSORCAST_*` environment overrides. Invalid values are left
/// out and returned.
pub fn apply_env_overrides(settings: &mut Settings) -> Vec<RejectedEnvVar> {
    apply_overrides(settings, |name| std::env::var(name).ok())
}

/// Same as [`apply_env_overrides`] with an injectable variable lookup.
pub fn apply_overrides<F>(settings: &mut Settings, lookup: F) -> Vec<RejectedEnvVar>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader {
        lookup,
        rejected: RefCell::new(Vec::new()),
    };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SENSORCAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("SENSORCAST_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Live ────────────────────────────────────────────────────────
    if let Some(v) = env.string("SENSORCAST_STRATEGY") {
        match v.parse::<SourceStrategy>() {
            Ok(strategy) => settings.live.strategy = strategy,
            Err(_) => env.reject("SENSORCAST_STRATEGY", &v, "poll or feed"),
        }
    }
    if let Some(v) = env.u64("SENSORCAST_POLL_INTERVAL_MS", 10, 3_600_000) {
        settings.live.poll_interval_ms = v;
    }
    if let Some(v) = env.u64("SENSORCAST_SAFETY_OVERLAP_MS", 0, 3_600_000) {
        settings.live.safety_overlap_ms = v;
    }
    if let Some(v) = env.u64("SENSORCAST_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.live.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.usize("SENSORCAST_SINK_CAPACITY", 2, 1_000_000) {
        settings.live.sink_capacity = v;
    }
    if let Some(v) = env.bool("SENSORCAST_AGGREGATE_BY_ASSET") {
        settings.live.aggregate_by_asset = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("SENSORCAST_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = env.usize("SENSORCAST_FEED_CAPACITY", 1, 1_000_000) {
        settings.store.feed_capacity = v;
    }

    // ── Telemetry ───────────────────────────────────────────────────
    if let Some(v) = env.string("SENSORCAST_LOG_LEVEL") {
        settings.telemetry.level = v;
    }
    if let Some(v) = env.bool("SENSORCAST_LOG_JSON") {
        settings.telemetry.json = v;
    }

    env.rejected.into_inner()
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
    rejected: RefCell<Vec<RejectedEnvVar>>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn reject(&self, name: &str, value: &str, expected: &'static str) {
        self.rejected.borrow_mut().push(RejectedEnvVar {
            key: name.to_string(),
            value: value.to_string(),
            expected,
        });
    }

    fn checked<T>(
        &self,
        name: &str,
        expected: &'static str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            self.reject(name, &val, expected);
        }
        result
    }

    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.checked(name, "boolean", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.checked(name, "u16 in range", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.checked(name, "u64 in range", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.checked(name, "usize in range", |v| parse_usize_range(v, min, max))
    }
}
