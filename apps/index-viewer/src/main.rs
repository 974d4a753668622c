//! Index Viewer Binary
//!
//! Connects to the index engine, keeps a reconciled view and logs it
//! periodically.
//!
//! # Environment Variables
//!
//! - `INDEX_VIEWER_BASE_URL`: Engine URL (default: http://localhost:8000)
//! - `INDEX_VIEWER_PING_SECS`: Keepalive interval (default: 30)
//! - `INDEX_VIEWER_RETRY_DELAY_SECS`: Delay between reconnects (default: 3)
//! - `INDEX_VIEWER_RETRY_JITTER`: Jitter fraction of the delay (default: 0)
//! - `INDEX_VIEWER_MAX_ATTEMPTS`: Reconnects before giving up, 0 = unlimited (default: 10)
//! - `INDEX_VIEWER_LOG_INTERVAL_SECS`: View summary interval (default: 10)
//! - `RUST_LOG`: Log level (default: info)

use std::time::Duration;

use index_viewer::{StreamClient, ViewState, ViewerConfig};
use tokio::signal;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // wss:// needs a process-wide crypto provider.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ViewerConfig::from_env()?;
    tracing::info!(
        base_url = %config.base_url,
        stream_url = %config.stream_url(),
        retry_delay_secs = config.reconnect.delay.as_secs(),
        max_attempts = config.reconnect.max_attempts,
        "Starting Index Viewer"
    );

    let log_interval = config.log_interval;
    let client = StreamClient::new(config)?;
    let reconciler = client.reconciler();
    let cancel = CancellationToken::new();

    let logger_cancel = cancel.clone();
    let logger = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + log_interval, log_interval);
        loop {
            tokio::select! {
                () = logger_cancel.cancelled() => break,
                _ = ticker.tick() => log_view(&reconciler.lock().view()),
            }
        }
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        signal_cancel.cancel();
    });

    let result = client.run(cancel.clone()).await;
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), logger).await;

    log_view(&client.view());
    result?;
    tracing::info!("Index viewer stopped");
    Ok(())
}

fn log_view(view: &ViewState) {
    if view.degraded {
        tracing::warn!(
            value = view.value,
            date = ?view.date,
            history = view.history_len,
            "Stream disconnected, showing last known value"
        );
    } else {
        tracing::info!(
            value = view.value,
            change_percent = view.change_percent,
            date = ?view.date,
            constituents = view.constituent_count,
            history = view.history_len,
            latest_history_date = ?view.latest_history_date,
            connected = view.connected,
            source = ?view.source,
            "Index view"
        );
    }
}
