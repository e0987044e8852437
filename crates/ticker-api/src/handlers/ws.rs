//! WebSocket endpoint: the client accept path.
//!
//! Each socket is split: a writer task drains the connection's outbound
//! queue onto the socket, and the upgrade task reads (and ignores) client
//! frames until the client goes away. Either side ending deregisters the
//! connection.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ticker_core::error::AppError;
use ticker_realtime::ClientConnection;

use crate::error::ApiError;
use crate::state::AppState;

/// GET / and GET /ws: WebSocket upgrade
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if state.engine.registry.is_shut_down() {
        return Err(AppError::service_unavailable("Relay is shutting down").into());
    }
    Ok(ws.on_upgrade(move |socket| handle_ws_connection(state, socket)))
}

/// Handles an established WebSocket connection.
async fn handle_ws_connection(state: AppState, socket: WebSocket) {
    let (ws_tx, mut ws_rx) = socket.split();

    let (conn, outbound_rx) = state.engine.registry.connect();
    let conn_id = conn.id;

    let mut writer = tokio::spawn(write_loop(
        conn.clone(),
        outbound_rx,
        ws_tx,
        state.config.realtime.send_timeout(),
        state.config.realtime.ping_interval(),
    ));

    loop {
        tokio::select! {
            _ = &mut writer => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    state.engine.registry.deregister(&conn_id);
    writer.abort();

    debug!(conn_id = %conn_id, "WebSocket connection finished");
}

/// Writes queued payloads to the socket in order, with keepalive pings.
///
/// Every write is bounded by `send_timeout`; a timed-out or failed write
/// closes the connection. When the registry closes the connection the
/// writer sends a close frame and stops.
async fn write_loop(
    conn: Arc<ClientConnection>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    send_timeout: Duration,
    ping_interval: Duration,
) {
    let ping_interval = ping_interval.max(Duration::from_secs(1));
    let mut ping =
        tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let msg = tokio::select! {
            biased;
            _ = conn.closed() => break,
            payload = outbound_rx.recv() => match payload {
                Some(payload) => frame(&payload),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match tokio::time::timeout(send_timeout, ws_tx.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn_id = %conn.id, error = %e, "Socket write failed");
                conn.close();
                return;
            }
            Err(_) => {
                info!(
                    conn_id = %conn.id,
                    timeout_ms = send_timeout.as_millis() as u64,
                    "Socket write timed out, dropping client"
                );
                conn.close();
                return;
            }
        }
    }

    let _ = tokio::time::timeout(send_timeout, ws_tx.send(Message::Close(None))).await;
}

/// Wraps a payload in a frame without altering its bytes.
fn frame(payload: &Bytes) -> Message {
    match std::str::from_utf8(payload) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(payload.clone()),
    }
}
