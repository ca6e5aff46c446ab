//! Candlestick bars and the preview/commit event split.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Candlestick interval. The engine only subscribes to intervals it knows
/// how to size buffers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    /// Wire representation used by the exchange ("15m", "1h", ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Bar duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
            Self::D1 => 86_400_000,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an interval string.
#[derive(Debug, Clone)]
pub struct ParseIntervalError(pub String);

impl fmt::Display for ParseIntervalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown interval '{}'", self.0)
    }
}

impl std::error::Error for ParseIntervalError {}

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(ParseIntervalError(other.to_string())),
        }
    }
}

/// Where a bar came from. REST-fetched bars (warmup and gap repair) are
/// always closed; the live stream produces both open and closed bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarSource {
    #[serde(rename = "rest")]
    Rest,
    #[serde(rename = "ws")]
    Ws,
}

impl BarSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Ws => "ws",
        }
    }
}

/// One OHLCV bar. `open_time` is the canonical key per `(symbol, interval)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub interval: Interval,
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: i64,
    pub is_closed: bool,
    pub source: BarSource,
}

/// A market event for one bar.
///
/// The preview/commit distinction is first-class: previews are revisions of
/// the still-open tail bar and must never mutate committed state; a commit is
/// the final record for its `open_time`.
#[derive(Debug, Clone)]
pub enum BarEvent {
    /// Live revision of the in-progress bar (`is_closed == false`).
    Preview(Bar),
    /// Final bar for its open time (`is_closed == true`).
    Commit(Bar),
}

impl BarEvent {
    pub fn bar(&self) -> &Bar {
        match self {
            Self::Preview(b) | Self::Commit(b) => b,
        }
    }

    pub fn interval(&self) -> Interval {
        self.bar().interval
    }

    pub fn is_commit(&self) -> bool {
        matches!(self, Self::Commit(_))
    }
}
