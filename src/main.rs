use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use sensorcast_live::SourceStrategy;
use sensorcast_server::{loader, Settings};
use sensorcast_store::{Database, SqliteReadingStore};
use sensorcast_telemetry::{init_telemetry, MetricsRecorder};

/// Stream live sensor readings to subscribed HTTP clients.
#[derive(Debug, Parser)]
#[command(name = "sensorcast", version)]
struct Cli {
    /// Settings file (default: ~/.sensorcast/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// SQLite database holding assets, sensors and readings.
    #[arg(long)]
    db: Option<String>,

    /// Change detection strategy: `poll` or `feed`.
    #[arg(long)]
    strategy: Option<SourceStrategy>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Group each cycle's changes into one frame per asset.
    #[arg(long)]
    aggregate_by_asset: bool,

    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db) = &self.db {
            settings.store.db_path = db.clone();
        }
        if let Some(strategy) = self.strategy {
            settings.live.strategy = strategy;
        }
        if let Some(ms) = self.poll_interval_ms {
            settings.live.poll_interval_ms = ms;
        }
        if self.aggregate_by_asset {
            settings.live.aggregate_by_asset = true;
        }
        if let Some(level) = &self.log_level {
            settings.telemetry.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings_path = cli.config.clone().unwrap_or_else(loader::settings_path);
    let loaded = loader::load_settings_from_path(&settings_path);
    let mut settings = loaded
        .as_ref()
        .map(|l| l.settings.clone())
        .unwrap_or_default();
    cli.apply(&mut settings);

    let _ = init_telemetry(&settings.telemetry.to_config());

    // Loading ran before any subscriber existed; report its outcome now.
    match loaded {
        Ok(loaded) => loaded.log_rejected(),
        Err(e) => {
            tracing::error!(path = %settings_path.display(), error = %e, "failed to load settings");
            return ExitCode::FAILURE;
        }
    }

    tracing::info!("starting sensorcast");

    let db_path = settings.store.resolved_db_path();
    let db = match Database::open(&db_path) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(path = %db_path.display(), error = %e, "failed to open database");
            return ExitCode::FAILURE;
        }
    };
    let store = Arc::new(SqliteReadingStore::new(db, settings.store.feed_capacity));
    let metrics = Arc::new(MetricsRecorder::new());

    let handle = match sensorcast_server::start(&settings, store, metrics).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(port = handle.port, "sensorcast ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
    }

    tracing::info!("shutting down");
    handle.shutdown().await;
    ExitCode::SUCCESS
}
