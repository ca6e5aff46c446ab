use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use binance_rest::{BinanceRestClient, KLINES_PAGE_LIMIT};
use common::{now_ms, ExponentialBackoff};
use connector_core::{ConnectionState, ConnectorError, EventSender, SourceConfig};
use futures_util::{SinkExt, StreamExt};
use metrics::SharedMetrics;
use model::{Bar, BarEvent, Interval};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::parser::{parse_message, ParsedMessage};

/// Duration of stable connection before resetting backoff.
const STABLE_CONNECTION_THRESHOLD: Duration = Duration::from_secs(300);

/// Timeout for the WebSocket connection attempt itself.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the combined kline stream URL for all subscribed intervals.
pub fn build_stream_url(ws_base: &str, symbol: &str, intervals: &[Interval]) -> String {
    let streams: Vec<String> = intervals
        .iter()
        .map(|iv| format!("{}@kline_{}", symbol.to_lowercase(), iv.as_str()))
        .collect();
    format!("{}/stream?streams={}", ws_base.trim_end_matches('/'), streams.join("/"))
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

enum ConnectResult {
    Connected(WsStream),
    Shutdown,
    Error(ConnectorError),
}

async fn connect_with_timeout(url: &str, shutdown_rx: &mut watch::Receiver<bool>) -> ConnectResult {
    tokio::select! {
        biased;

        _ = shutdown_rx.changed() => {
            if *shutdown_rx.borrow() {
                return ConnectResult::Shutdown;
            }
            ConnectResult::Error(ConnectorError::WebSocket("connection interrupted".to_string()))
        }

        result = tokio::time::timeout(CONNECTION_TIMEOUT, connect_async(url)) => {
            match result {
                Ok(Ok((stream, _))) => ConnectResult::Connected(stream),
                Ok(Err(e)) => ConnectResult::Error(ConnectorError::WebSocket(e.to_string())),
                Err(_) => ConnectResult::Error(ConnectorError::WebSocket("connection timeout".to_string())),
            }
        }
    }
}

enum SessionResult {
    /// Shutdown was requested while the session ran.
    Shutdown,
    /// Session streamed and then ended (returns how long it lasted).
    Streamed {
        duration: Duration,
        error: ConnectorError,
    },
    /// Failed before streaming started.
    ConnectFailed(ConnectorError),
}

/// Fetch every closed bar after the recorded tails and emit them as commits.
///
/// Idempotent: downstream persistence upserts by `(symbol, interval,
/// open_time)`, and the engine skips bars already committed to the buffer.
async fn repair_gaps(
    config: &SourceConfig,
    rest: &BinanceRestClient,
    tails: &mut HashMap<Interval, i64>,
    sender: &EventSender,
    metrics: &SharedMetrics,
) -> Result<u64, ConnectorError> {
    let now = now_ms();
    let mut missing: Vec<Bar> = Vec::new();

    for &interval in &config.intervals {
        let Some(&tail) = tails.get(&interval) else {
            continue;
        };

        let mut cursor = tail + 1;
        loop {
            let page = rest
                .fetch_klines(
                    &config.symbol,
                    interval,
                    KLINES_PAGE_LIMIT,
                    Some(cursor),
                    None,
                )
                .await
                .map_err(|e| ConnectorError::GapRepair(e.to_string()))?;

            // The exchange includes the still-open bar as the last row
            let closed: Vec<Bar> = page
                .iter()
                .filter(|b| b.close_time <= now)
                .cloned()
                .collect();
            let page_len = page.len();

            if let Some(last) = closed.last() {
                cursor = last.open_time + 1;
            }
            missing.extend(closed);

            if page_len < KLINES_PAGE_LIMIT {
                break;
            }
        }
    }

    // Chronological, shorter intervals first when open times coincide
    missing.sort_by_key(|b| (b.open_time, b.interval.duration_ms()));

    let repaired = missing.len() as u64;
    for bar in missing {
        tails.insert(bar.interval, bar.open_time);
        if sender.send(BarEvent::Commit(bar)).await.is_err() {
            return Err(ConnectorError::ChannelClosed);
        }
    }

    if repaired > 0 {
        metrics.add_repaired_bars(repaired);
        info!(bars = repaired, "gap repair emitted missing commits");
    }
    Ok(repaired)
}

/// Run a single WebSocket session: connect, repair the gap since the last
/// committed bar, then stream until an error, idle timeout, or shutdown.
async fn run_session(
    config: &SourceConfig,
    url: &str,
    rest: &BinanceRestClient,
    tails: &mut HashMap<Interval, i64>,
    repair_failures: &mut u32,
    sender: &EventSender,
    shutdown_rx: &mut watch::Receiver<bool>,
    metrics: &SharedMetrics,
) -> SessionResult {
    info!(url = %url, state = %ConnectionState::Connecting, "connecting to kline stream");

    let ws_stream = match connect_with_timeout(url, shutdown_rx).await {
        ConnectResult::Connected(stream) => stream,
        ConnectResult::Shutdown => return SessionResult::Shutdown,
        ConnectResult::Error(e) => return SessionResult::ConnectFailed(e),
    };

    debug!(state = %ConnectionState::Handshaking, "connected, repairing gap before streaming");

    // Gap repair runs before the session is considered live. After repeated
    // failures the source goes degraded and streams anyway with stale history.
    match repair_gaps(config, rest, tails, sender, metrics).await {
        Ok(_) => {
            *repair_failures = 0;
            metrics.set_degraded(false);
        }
        Err(ConnectorError::ChannelClosed) => {
            return SessionResult::ConnectFailed(ConnectorError::ChannelClosed);
        }
        Err(e) => {
            *repair_failures += 1;
            metrics.inc_repair_failures();
            warn!(
                error = %e,
                consecutive = *repair_failures,
                "gap repair failed"
            );
            if *repair_failures < config.max_repair_failures {
                return SessionResult::ConnectFailed(e);
            }
            metrics.set_degraded(true);
            error!(
                consecutive = *repair_failures,
                "gap repair failing persistently, streaming with stale history"
            );
        }
    }

    info!(state = %ConnectionState::Streaming, "kline stream live");
    let connected_at = std::time::Instant::now();

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("shutdown signal received, closing connection");
                    let _ = write.close().await;
                    return SessionResult::Shutdown;
                }
            }

            msg_opt = tokio::time::timeout(config.idle_timeout, read.next()) => {
                let msg = match msg_opt {
                    Err(_) => {
                        warn!(
                            idle_secs = config.idle_timeout.as_secs(),
                            "no message within idle timeout, reconnecting"
                        );
                        metrics.inc_websocket_errors();
                        return SessionResult::Streamed {
                            duration: connected_at.elapsed(),
                            error: ConnectorError::IdleTimeout,
                        };
                    }
                    Ok(Some(Ok(m))) => m,
                    Ok(Some(Err(e))) => {
                        error!(error = %e, "WebSocket error");
                        metrics.inc_websocket_errors();
                        return SessionResult::Streamed {
                            duration: connected_at.elapsed(),
                            error: ConnectorError::WebSocket(e.to_string()),
                        };
                    }
                    Ok(None) => {
                        info!("WebSocket stream ended");
                        return SessionResult::Streamed {
                            duration: connected_at.elapsed(),
                            error: ConnectorError::ConnectionClosed,
                        };
                    }
                };

                match msg {
                    Message::Text(text) => {
                        metrics.inc_messages_received();
                        match parse_message(&text) {
                            Ok(ParsedMessage::Kline(bar)) => {
                                let event = if bar.is_closed {
                                    metrics.inc_commits_received();
                                    tails.insert(bar.interval, bar.open_time);
                                    BarEvent::Commit(bar)
                                } else {
                                    metrics.inc_previews_received();
                                    BarEvent::Preview(bar)
                                };
                                if sender.send(event).await.is_err() {
                                    info!("receiver dropped, stopping connector");
                                    return SessionResult::Streamed {
                                        duration: connected_at.elapsed(),
                                        error: ConnectorError::ChannelClosed,
                                    };
                                }
                            }
                            Ok(ParsedMessage::Unknown) => {
                                // Ignore unknown messages silently
                            }
                            Err(e) => {
                                metrics.inc_parse_errors();
                                warn!(error = %e, "failed to parse message");
                            }
                        }
                    }
                    Message::Ping(data) => {
                        debug!("received Ping, sending Pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            warn!(error = %e, "failed to send Pong");
                            metrics.inc_websocket_errors();
                            return SessionResult::Streamed {
                                duration: connected_at.elapsed(),
                                error: ConnectorError::WebSocket(e.to_string()),
                            };
                        }
                    }
                    Message::Close(_) => {
                        info!("WebSocket closed by server");
                        return SessionResult::Streamed {
                            duration: connected_at.elapsed(),
                            error: ConnectorError::ConnectionClosed,
                        };
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Run the market source with automatic reconnection.
///
/// `tails` carries the last committed `open_time` per interval (seeded by
/// warmup); every reconnect repairs the window after them before streaming.
/// Returns only when the receiver is dropped or shutdown is signaled.
pub async fn run_connector(
    config: SourceConfig,
    rest: Arc<BinanceRestClient>,
    mut tails: HashMap<Interval, i64>,
    sender: EventSender,
    mut shutdown_rx: watch::Receiver<bool>,
    metrics: SharedMetrics,
) -> Result<(), ConnectorError> {
    let url = build_stream_url(&config.ws_base, &config.symbol, &config.intervals);
    let mut backoff = ExponentialBackoff::default();
    let mut needs_reconnect = false;
    let mut repair_failures: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            info!("shutdown requested, exiting connector");
            return Ok(());
        }

        let result = run_session(
            &config,
            &url,
            &rest,
            &mut tails,
            &mut repair_failures,
            &sender,
            &mut shutdown_rx,
            &metrics,
        )
        .await;

        match result {
            SessionResult::Shutdown => {
                info!("connector shutdown complete");
                return Ok(());
            }
            SessionResult::Streamed { duration, error } => {
                if needs_reconnect {
                    metrics.inc_reconnect_successes();
                }
                needs_reconnect = true;

                if matches!(error, ConnectorError::ChannelClosed) {
                    info!("channel closed, exiting connector");
                    return Err(ConnectorError::ChannelClosed);
                }

                if duration >= STABLE_CONNECTION_THRESHOLD {
                    backoff.reset();
                }

                metrics.inc_reconnect_attempts();

                let delay = backoff.next_delay();
                warn!(
                    error = %error,
                    state = %ConnectionState::Reconnecting,
                    attempt = backoff.attempt(),
                    delay_secs = delay.as_secs_f64(),
                    "connection lost, reconnecting"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("shutdown requested during backoff");
                            return Ok(());
                        }
                    }
                }
            }
            SessionResult::ConnectFailed(e) => {
                if matches!(e, ConnectorError::ChannelClosed) {
                    return Err(ConnectorError::ChannelClosed);
                }
                if needs_reconnect {
                    metrics.inc_reconnect_attempts();
                }

                let delay = backoff.next_delay();
                warn!(
                    error = %e,
                    attempt = backoff.attempt(),
                    delay_secs = delay.as_secs_f64(),
                    "connection failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("shutdown requested during backoff");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
