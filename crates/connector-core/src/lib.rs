use std::time::Duration;

use model::{BarEvent, Interval};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Gap repair failed: {0}")]
    GapRepair(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Idle timeout")]
    IdleTimeout,

    #[error("Shutdown requested")]
    Shutdown,
}

/// Connection lifecycle of the live market source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Streaming,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Trading pair, e.g. "BTCUSDT".
    pub symbol: String,
    /// Candlestick intervals to subscribe to.
    pub intervals: Vec<Interval>,
    /// Exchange REST base URL.
    pub rest_base: String,
    /// Exchange WebSocket base URL.
    pub ws_base: String,
    /// Bar event channel capacity.
    pub channel_capacity: usize,
    /// Reconnect when no message arrives within this window.
    pub idle_timeout: Duration,
    /// Consecutive gap-repair failures before the source is marked degraded.
    pub max_repair_failures: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            intervals: vec![Interval::M15, Interval::H1],
            rest_base: "https://fapi.binance.com".to_string(),
            ws_base: "wss://fstream.binance.com".to_string(),
            channel_capacity: 1024,
            idle_timeout: Duration::from_secs(60),
            max_repair_failures: 3,
        }
    }
}

pub type EventSender = mpsc::Sender<BarEvent>;
pub type EventReceiver = mpsc::Receiver<BarEvent>;

pub fn create_event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}
