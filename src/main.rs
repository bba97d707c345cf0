//! FLOORSCOUT: collectible-card arbitrage scanner.
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the SQLite store (ingesting the seed file if configured), starts the
//! HTTP API and runs the periodic detection loop with graceful shutdown.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use floorscout::api::{self, ApiState, AppState};
use floorscout::config;
use floorscout::engine::{DetectionOutcome, Detector};
use floorscout::ingest;
use floorscout::notify::{AlertDispatcher, ConsoleSink, TelegramSink};
use floorscout::storage::{ObservationStore, SqliteStore};

const BANNER: &str = r#"
  _____ _     ___   ___  ____  ____   ____ ___  _   _ _____
 |  ___| |   / _ \ / _ \|  _ \/ ___| / ___/ _ \| | | |_   _|
 | |_  | |  | | | | | | | |_) \___ \| |  | | | | | | | | |
 |  _| | |__| |_| | |_| |  _ < ___) | |__| |_| | |_| | | |
 |_|   |_____\___/ \___/|_| \_\____/ \____\___/ \___/  |_|

  Floor pricing and arbitrage detection for graded cards
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        scan_interval_secs = cfg.service.scan_interval_secs,
        database = %cfg.storage.database_url,
        "FLOORSCOUT starting up"
    );

    let detection = cfg
        .detection_config()
        .context("Invalid [detection] configuration")?;

    // -- Storage ---------------------------------------------------------

    let store: Arc<dyn ObservationStore> = Arc::new(
        SqliteStore::connect(&cfg.storage.database_url, cfg.storage.max_connections)
            .await
            .context("Failed to open observation store")?,
    );

    if let Some(seed) = &cfg.storage.seed_file {
        seed_store(store.as_ref(), seed).await?;
    }

    // -- Components ------------------------------------------------------

    let mut dispatcher = AlertDispatcher::new().with_sink(Box::new(ConsoleSink::new()));
    if let (Some(token_env), Some(chat_env)) = (
        cfg.alerts.telegram_bot_token_env.as_deref(),
        cfg.alerts.telegram_chat_id_env.as_deref(),
    ) {
        if let Some(telegram) = TelegramSink::from_env(token_env, chat_env)? {
            dispatcher = dispatcher.with_sink(Box::new(telegram));
        }
    }
    info!(sinks = ?dispatcher.sink_names(), "Notification sinks ready");

    let detector = Arc::new(Detector::new(store, detection)?);
    let state: AppState = Arc::new(ApiState::new(detector.clone(), dispatcher));

    if cfg.api.enabled {
        api::spawn_api(state.clone(), cfg.api.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.service.scan_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.service.scan_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    let mut cycles = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match detector.run_cycle().await {
                    Ok(outcome) => {
                        cycles += 1;
                        after_cycle(&state, outcome, cfg.service.send_alerts).await;
                    }
                    Err(e) => {
                        error!(error = %e, "Cycle failed, continuing to next");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!(cycles, "FLOORSCOUT shut down cleanly.");
    Ok(())
}

/// Ingest the seed file if it exists. Listings already in the store keep
/// their current state.
async fn seed_store(store: &dyn ObservationStore, path: &str) -> Result<()> {
    if !Path::new(path).exists() {
        warn!(path, "Seed file not found, skipping");
        return Ok(());
    }
    let records = ingest::load_seed_file(path)?;
    let report = ingest::ingest_seed(store, records)
        .await
        .context("Failed to ingest seed file")?;
    info!(
        sales = report.sales_added,
        listings = report.listings_upserted,
        listings_existing = report.listings_existing,
        rejected = report.rejected,
        "Seed data ingested"
    );
    Ok(())
}

/// Publish the cycle report and dispatch alerts for new opportunities.
async fn after_cycle(state: &AppState, outcome: DetectionOutcome, send_alerts: bool) {
    *state.last_report.write().await = Some(outcome.report);

    if !send_alerts || outcome.created.is_empty() {
        return;
    }
    let store = state.detector.store().as_ref();
    if let Err(e) = state.dispatcher.dispatch(store, &outcome.created).await {
        error!(error = %e, "Alert dispatch failed");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("floorscout=info"));

    let json_logging = std::env::var("FLOORSCOUT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
