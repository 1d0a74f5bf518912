/// SQL DDL for the reading store.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sensors (
    id TEXT PRIMARY KEY,
    asset_id TEXT REFERENCES assets(id),
    name TEXT NOT NULL,
    unit TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sensor_values (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sensor_id TEXT NOT NULL REFERENCES sensors(id),
    value REAL NOT NULL,
    ts_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_values_ts ON sensor_values(ts_us);
CREATE INDEX IF NOT EXISTS idx_values_sensor_ts ON sensor_values(sensor_id, ts_us);
CREATE INDEX IF NOT EXISTS idx_sensors_asset ON sensors(asset_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
