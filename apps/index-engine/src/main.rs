//! Index Engine Binary
//!
//! Starts the index engine: scheduler, REST API and index stream.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin index-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Index
//! - `INDEX_CONSTITUENTS_PATH`: Constituents JSON file (default: constituents.json)
//! - `INDEX_DATA_PATH`: Persisted index document, or "memory" (default: data/index.json)
//! - `INDEX_BASE_DATE`: Base date, YYYY-MM-DD (default: 2024-01-02)
//! - `INDEX_BASE_VALUE`: Base value (default: 1000)
//! - `INDEX_BACKFILL_ON_START`: Backfill missing history at start (default: true)
//!
//! ## Schedule
//! - `INDEX_UTC_OFFSET`: Exchange offset (default: +07:00)
//! - `INDEX_SESSION_OPEN` / `INDEX_SESSION_CLOSE`: Session, HH:MM (default: 09:00-15:00)
//! - `INDEX_EOD_TIME`: End-of-day finalization, HH:MM (default: 17:00)
//! - `INDEX_TICK_INTERVAL_SECS`: Intraday tick interval (default: 60)
//!
//! ## Server
//! - `INDEX_HTTP_PORT`: HTTP port (default: 8000)
//! - `INDEX_ADMIN_TOKEN`: Bearer token for `/api/admin/*` (default: unset, open)
//! - `INDEX_WS_*`: Stream queue, heartbeat and history settings
//!
//! ## Observability
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use index_engine::application::ports::{IndexRepository, QuoteSource, SnapshotPublisher};
use index_engine::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use index_engine::infrastructure::config::load_constituents;
use index_engine::infrastructure::http::{AppState, HttpServer};
use index_engine::infrastructure::persistence::{
    InMemoryIndexRepository, JsonFileIndexRepository,
};
use index_engine::infrastructure::quotes::SimulatedQuoteSource;
use index_engine::infrastructure::scheduler::{IndexScheduler, MarketCalendar};
use index_engine::infrastructure::telemetry;
use index_engine::{EngineConfig, EngineSettings, IndexEngine, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Index Engine");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = EngineConfig::from_env()?;
    log_config(&config);

    let (registry, definitions) = load_constituents(&config.index.constituents_path)?;
    tracing::info!(
        path = %config.index.constituents_path.display(),
        constituents = registry.len(),
        "Constituents loaded"
    );

    let shutdown_token = CancellationToken::new();

    // Adapters
    let quotes: Arc<dyn QuoteSource> =
        Arc::new(SimulatedQuoteSource::new(&definitions, &config.simulation));
    let repository: Arc<dyn IndexRepository> = match &config.index.data_path {
        Some(path) => Arc::new(JsonFileIndexRepository::new(path.clone())),
        None => {
            tracing::warn!("No data path configured, index state will not survive restarts");
            Arc::new(InMemoryIndexRepository::new())
        }
    };
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(
        config.broadcast.clone(),
    )));
    let publisher: Arc<dyn SnapshotPublisher> = broadcast_hub.clone();

    // Engine
    let calendar = MarketCalendar::from_settings(&config.schedule);
    let engine = Arc::new(IndexEngine::new(
        EngineSettings {
            base_date: config.index.base_date,
            base_value: config.index.base_value,
            quote_timeout: config.engine.quote_timeout,
            stale_warn_ticks: config.engine.stale_warn_ticks,
            market_offset: calendar.offset(),
        },
        registry,
        quotes,
        repository,
        publisher,
    ));

    // A failed start leaves the engine uncalibrated or halted; health reports it.
    if let Err(e) = engine.initialize().await {
        tracing::error!(error = %e, "Engine initialization failed");
    } else {
        if config.index.backfill_on_start {
            let today = calendar.trading_date(Utc::now());
            if let Err(e) = engine.backfill(today).await {
                tracing::warn!(error = %e, "Start-up backfill failed");
            }
        }
        // Prime a snapshot so the API has data outside the session.
        if let Err(e) = engine.tick(Utc::now()).await {
            tracing::warn!(error = %e, "Initial calculation failed");
        }
    }

    if config.admin_token.is_none() {
        tracing::warn!("INDEX_ADMIN_TOKEN not set, administrative endpoints are open");
    }

    // Scheduler
    let scheduler = IndexScheduler::new(
        Arc::clone(&engine),
        calendar,
        config.schedule.tick_interval,
    );
    let scheduler_shutdown = shutdown_token.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    // HTTP server
    let app_state = Arc::new(AppState::new(
        Arc::clone(&engine),
        Arc::clone(&broadcast_hub),
        config.index.clone(),
        calendar,
        config.admin_token.clone(),
        shutdown_token.clone(),
    ));
    let http_server = HttpServer::new(
        config.server.http_port,
        app_state,
        shutdown_token.clone(),
    );
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Index engine ready");

    await_shutdown(shutdown_token).await;

    broadcast_hub.close_all();
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(scheduler_task, http_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out waiting for tasks");
    }

    tracing::info!("Index engine stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        name = %config.index.name,
        base_date = %config.index.base_date,
        base_value = config.index.base_value,
        http_port = config.server.http_port,
        utc_offset = %config.schedule.utc_offset,
        "Configuration loaded"
    );
    tracing::debug!(
        session_open = %config.schedule.session_open,
        session_close = %config.schedule.session_close,
        eod_time = %config.schedule.eod_time,
        tick_interval_secs = config.schedule.tick_interval.as_secs(),
        queue_capacity = config.broadcast.subscriber_queue_capacity,
        "Schedule and fan-out settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
