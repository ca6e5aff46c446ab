use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use engine::EngineCommand;
use fanout::{StatusStore, StreamStore};
use indicators::IndicatorConfig;
use model::Interval;
use storage::DbHandle;
use tokio::sync::mpsc;

/// WebSocket push cadence: every producer update (practically: a fast fixed
/// poll) or the most recent value every N seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushInterval {
    Raw,
    Seconds(u64),
}

impl PushInterval {
    pub fn period(&self) -> std::time::Duration {
        match self {
            Self::Raw => std::time::Duration::from_millis(200),
            Self::Seconds(s) => std::time::Duration::from_secs((*s).max(1)),
        }
    }
}

impl FromStr for PushInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "raw" {
            return Ok(Self::Raw);
        }
        s.parse::<u64>()
            .map(Self::Seconds)
            .map_err(|_| format!("invalid push interval '{}', expected \"raw\" or seconds", s))
    }
}

/// Shared state behind every handler.
pub struct AppState {
    pub db: DbHandle,
    pub status: Arc<StatusStore>,
    pub stream: Arc<StreamStore>,
    pub commands: mpsc::Sender<EngineCommand>,
    /// `(id, kind)` of every registered strategy.
    pub strategies: Vec<(String, String)>,
    pub default_strategy: String,
    pub indicator_configs: HashMap<String, IndicatorConfig>,
    pub symbol: String,
    pub exec_interval: Interval,
    pub push_interval: PushInterval,
}

impl AppState {
    pub fn knows_strategy(&self, sid: &str) -> bool {
        self.strategies.iter().any(|(id, _)| id == sid)
    }
}
