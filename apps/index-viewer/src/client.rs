//! Index Stream Client
//!
//! Drives the reconnect state machine, consumes the engine's stream and feeds
//! every decoded message into the shared [`ClientReconciler`]. While the
//! stream has not delivered its `initial`, each connection attempt first
//! refreshes the view from the REST fallback.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use index_engine::{KEEPALIVE_PING, decode_message};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use crate::config::ViewerConfig;
use crate::connection::{NextStep, ReconnectError, ReconnectMachine};
use crate::reconciler::{Applied, ClientReconciler, ViewState};
use crate::rest::{RestClient, RestError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stream client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// REST client setup failed.
    #[error(transparent)]
    Rest(#[from] RestError),

    /// Retries exhausted.
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}

/// Why a connected session ended.
#[derive(Debug)]
enum SessionEnd {
    /// Cancellation requested.
    Shutdown,
    /// Connection lost.
    Dropped(String),
}

/// Reconciling client for the index stream.
pub struct StreamClient {
    config: ViewerConfig,
    rest: RestClient,
    reconciler: Arc<Mutex<ClientReconciler>>,
}

impl StreamClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Rest` if the HTTP client cannot be built.
    pub fn new(config: ViewerConfig) -> Result<Self, ClientError> {
        let rest = RestClient::new(config.base_url.clone(), config.rest_timeout)?;
        Ok(Self {
            config,
            rest,
            reconciler: Arc::new(Mutex::new(ClientReconciler::new())),
        })
    }

    /// Shared handle to the reconciled state.
    #[must_use]
    pub fn reconciler(&self) -> Arc<Mutex<ClientReconciler>> {
        Arc::clone(&self.reconciler)
    }

    /// Current view summary.
    #[must_use]
    pub fn view(&self) -> ViewState {
        self.reconciler.lock().view()
    }

    /// Run until cancelled or until the retry budget is spent.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Reconnect` when the engine stayed unreachable
    /// for the configured number of attempts. The last known view stays
    /// available through [`Self::view`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ClientError> {
        let url = self.config.stream_url();
        let mut machine = ReconnectMachine::new(self.config.reconnect.clone());
        let mut step = machine.start();

        loop {
            match step {
                NextStep::GiveUp => {
                    let attempts = machine.attempts();
                    tracing::error!(attempts, url = %url, "Giving up on the index stream");
                    return Err(ReconnectError::MaxAttemptsExceeded(attempts).into());
                }
                NextStep::Wait(delay) => {
                    tracing::info!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempts = machine.attempts(),
                        "Waiting before reconnect"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => {
                            machine.stop();
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    step = machine.after_backoff();
                }
                NextStep::Connect { attempt } => {
                    if !self.reconciler.lock().is_stream_initialized() {
                        tokio::select! {
                            () = cancel.cancelled() => {
                                machine.stop();
                                return Ok(());
                            }
                            () = self.refresh_from_rest() => {}
                        }
                    }

                    tracing::info!(attempt, url = %url, state = %machine.state(), "Connecting to index stream");
                    let connected = tokio::select! {
                        () = cancel.cancelled() => {
                            machine.stop();
                            return Ok(());
                        }
                        result = tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str())) => result,
                    };

                    match connected {
                        Ok(Ok((socket, _))) => {
                            machine.on_connected();
                            self.reconciler.lock().on_connected();
                            tracing::info!(url = %url, "Index stream connected");

                            let end = self.consume(socket, &cancel).await;
                            self.reconciler.lock().on_disconnected();
                            match end {
                                SessionEnd::Shutdown => {
                                    machine.stop();
                                    return Ok(());
                                }
                                SessionEnd::Dropped(reason) => {
                                    tracing::warn!(reason = %reason, "Index stream disconnected");
                                    step = machine.on_failure();
                                }
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(attempt, error = %e, "Stream connection failed");
                            step = machine.on_failure();
                        }
                        Err(_) => {
                            tracing::warn!(
                                attempt,
                                timeout_secs = self.config.connect_timeout.as_secs(),
                                "Stream connection timed out"
                            );
                            step = machine.on_failure();
                        }
                    }
                }
            }
        }
    }

    async fn refresh_from_rest(&self) {
        match self.rest.fetch_snapshot().await {
            Ok(snapshot) => {
                let applied = self.reconciler.lock().apply_rest(snapshot);
                tracing::debug!(?applied, "REST fallback fetched");
            }
            Err(e) => {
                tracing::warn!(error = %e, base_url = %self.rest.base_url(), "REST fallback failed");
            }
        }
    }

    async fn consume(&self, socket: Socket, cancel: &CancellationToken) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();
        let period = self.config.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
                _ = ping.tick() => {
                    if let Err(e) = sink.send(Message::text(KEEPALIVE_PING)).await {
                        return SessionEnd::Dropped(format!("keepalive failed: {e}"));
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Close(_))) => {
                        return SessionEnd::Dropped("closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                    None => return SessionEnd::Dropped("stream ended".to_string()),
                },
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let message = match decode_message(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed stream message");
                return;
            }
        };

        let kind = message.kind();
        let mut reconciler = self.reconciler.lock();
        match reconciler.apply_stream(message) {
            Applied::Initial => {
                let view = reconciler.view();
                tracing::info!(
                    value = view.value,
                    history = view.history_len,
                    constituents = view.constituent_count,
                    "Stream initialized"
                );
            }
            Applied::EndOfDay(date) => {
                tracing::info!(%date, value = reconciler.view().value, "End of day received");
            }
            applied => tracing::trace!(kind, ?applied, "Stream message applied"),
        }
    }
}
