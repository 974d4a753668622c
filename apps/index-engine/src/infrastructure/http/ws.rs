//! Index stream connections.
//!
//! One task per connection. It forwards frames from the subscriber's hub
//! queue to the socket, treats every inbound frame as keepalive activity and
//! closes the subscriber after too many silent heartbeat intervals. When the
//! hub evicts the subscriber its queue closes and the task ends.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, interval_at};

use super::AppState;
use crate::infrastructure::broadcast::{
    EvictionReason, KeepaliveStatus, KeepaliveTracker, Subscription,
};
use crate::infrastructure::wire::KEEPALIVE_PING;

pub(super) async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state))
}

async fn serve_subscriber(socket: WebSocket, state: Arc<AppState>) {
    let Subscription { id, mut receiver } = state.hub.subscribe();
    let (mut sink, mut stream) = socket.split();

    let mut keepalive = KeepaliveTracker::new(state.hub.config().keepalive());
    let period = keepalive.interval();
    let mut heartbeat = interval_at(Instant::now() + period, period);

    let reason = loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break Some(EvictionReason::Shutdown),

            frame = receiver.recv() => {
                let Some(frame) = frame else {
                    // Evicted by the hub.
                    break None;
                };
                if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
                    tracing::debug!(subscriber_id = %id, error = %e, "Socket write failed");
                    break Some(EvictionReason::SendFailed);
                }
            }

            incoming = stream.next() => match incoming {
                None | Some(Ok(Message::Close(_))) => break Some(EvictionReason::ClientClosed),
                Some(Ok(Message::Text(text))) => {
                    keepalive.record_activity();
                    if text.as_str() != KEEPALIVE_PING {
                        tracing::warn!(subscriber_id = %id, "Ignoring unexpected message from subscriber");
                    }
                }
                Some(Ok(_)) => keepalive.record_activity(),
                Some(Err(e)) => {
                    tracing::debug!(subscriber_id = %id, error = %e, "Socket read failed");
                    break Some(EvictionReason::ClientClosed);
                }
            },

            _ = heartbeat.tick() => {
                if keepalive.on_interval() == KeepaliveStatus::Expired {
                    tracing::info!(
                        subscriber_id = %id,
                        silent_for_ms = u64::try_from(keepalive.since_activity().as_millis()).unwrap_or(u64::MAX),
                        "Subscriber missed keepalives"
                    );
                    break Some(EvictionReason::HeartbeatTimeout);
                }
            }
        }
    };

    if let Some(reason) = reason {
        state.hub.evict(id, reason);
    }
    if let Err(e) = sink.close().await {
        tracing::debug!(subscriber_id = %id, error = %e, "Socket close failed");
    }
}
