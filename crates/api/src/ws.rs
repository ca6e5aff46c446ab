//! WebSocket push sessions.
//!
//! Each subscriber gets its own task polling the fan-out stores at the
//! configured cadence. A subscriber that cannot take a frame within the send
//! timeout is closed; nothing upstream notices.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use crate::state::AppState;

/// A slow subscriber is dropped after this long.
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn ws_status(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_loop(socket, state, FrameKind::Status))
}

pub async fn ws_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_loop(socket, state, FrameKind::Stream))
}

#[derive(Clone, Copy)]
enum FrameKind {
    Status,
    Stream,
}

async fn push_loop(socket: WebSocket, state: Arc<AppState>, kind: FrameKind) {
    let (mut sender, mut receiver) = socket.split();
    let period = state.push_interval.period();
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            // Client side: only closes (and pings handled by axum) matter
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "ws receive error");
                        break;
                    }
                    _ => {}
                }
            }

            _ = ticker.tick() => {
                let frame = match kind {
                    FrameKind::Status => json!({
                        "type": "status",
                        "strategies": state.status.all(),
                    }).to_string(),
                    FrameKind::Stream => state.stream.frame().to_string(),
                };

                match tokio::time::timeout(SEND_TIMEOUT, sender.send(Message::Text(frame))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "ws send failed, closing subscriber");
                        break;
                    }
                    Err(_) => {
                        warn!("subscriber exceeded send timeout, closing");
                        break;
                    }
                }
            }
        }
    }
}
