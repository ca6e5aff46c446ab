use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe counters for the market source.
#[derive(Debug)]
pub struct SourceMetrics {
    // Counters
    previews_received: AtomicU64,
    commits_received: AtomicU64,
    messages_received: AtomicU64,
    parse_errors: AtomicU64,
    websocket_errors: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnect_successes: AtomicU64,
    repaired_bars: AtomicU64,
    repair_failures: AtomicU64,

    /// Set after gap repair fails repeatedly; the source keeps streaming but
    /// downstream consumers should treat its state as stale.
    degraded: AtomicBool,

    inner: RwLock<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    start_time: Instant,
    last_bar_time: Option<Instant>,
    last_error_time: Option<Instant>,
}

impl Default for SourceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMetrics {
    pub fn new() -> Self {
        Self {
            previews_received: AtomicU64::new(0),
            commits_received: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            websocket_errors: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            reconnect_successes: AtomicU64::new(0),
            repaired_bars: AtomicU64::new(0),
            repair_failures: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            inner: RwLock::new(MetricsInner {
                start_time: Instant::now(),
                last_bar_time: None,
                last_error_time: None,
            }),
        }
    }

    // --- Increment methods ---

    pub fn inc_previews_received(&self) {
        self.previews_received.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_bar_time = Some(Instant::now());
    }

    pub fn inc_commits_received(&self) {
        self.commits_received.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_bar_time = Some(Instant::now());
    }

    pub fn inc_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_websocket_errors(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnect_successes(&self) {
        self.reconnect_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_repaired_bars(&self, n: u64) {
        self.repaired_bars.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_repair_failures(&self) {
        self.repair_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Relaxed);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    // --- Getter methods ---

    pub fn previews_received(&self) -> u64 {
        self.previews_received.load(Ordering::Relaxed)
    }

    pub fn commits_received(&self) -> u64 {
        self.commits_received.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn websocket_errors(&self) -> u64 {
        self.websocket_errors.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn reconnect_successes(&self) -> u64 {
        self.reconnect_successes.load(Ordering::Relaxed)
    }

    pub fn repaired_bars(&self) -> u64 {
        self.repaired_bars.load(Ordering::Relaxed)
    }

    pub fn repair_failures(&self) -> u64 {
        self.repair_failures.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.inner.read().start_time.elapsed().as_secs_f64()
    }

    pub fn secs_since_last_bar(&self) -> Option<f64> {
        self.inner
            .read()
            .last_bar_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    /// Generate a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            previews_received: self.previews_received(),
            commits_received: self.commits_received(),
            messages_received: self.messages_received(),
            parse_errors: self.parse_errors(),
            websocket_errors: self.websocket_errors(),
            reconnect_attempts: self.reconnect_attempts(),
            reconnect_successes: self.reconnect_successes(),
            repaired_bars: self.repaired_bars(),
            repair_failures: self.repair_failures(),
            degraded: self.is_degraded(),
            uptime_secs: self.uptime_secs(),
            secs_since_last_bar: self.secs_since_last_bar(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub previews_received: u64,
    pub commits_received: u64,
    pub messages_received: u64,
    pub parse_errors: u64,
    pub websocket_errors: u64,
    pub reconnect_attempts: u64,
    pub reconnect_successes: u64,
    pub repaired_bars: u64,
    pub repair_failures: u64,
    pub degraded: bool,
    pub uptime_secs: f64,
    pub secs_since_last_bar: Option<f64>,
}

/// Health status of the market source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Receiving data normally.
    Healthy,
    /// Stale data or failed gap repair; still serving.
    Degraded,
    /// No data for an extended period.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

impl MetricsSnapshot {
    /// Threshold in seconds for considering data stale (degraded).
    const STALE_THRESHOLD_SECS: f64 = 90.0;
    /// Threshold in seconds for considering the source unhealthy.
    const UNHEALTHY_THRESHOLD_SECS: f64 = 300.0;

    /// Determine the health status based on metrics.
    pub fn health_status(&self) -> HealthStatus {
        if self.degraded {
            return HealthStatus::Degraded;
        }

        let secs_since_bar = match self.secs_since_last_bar {
            Some(secs) => secs,
            None => {
                // No bars yet - if uptime is short, we're still starting up
                if self.uptime_secs < Self::STALE_THRESHOLD_SECS {
                    return HealthStatus::Healthy;
                } else if self.uptime_secs < Self::UNHEALTHY_THRESHOLD_SECS {
                    return HealthStatus::Degraded;
                } else {
                    return HealthStatus::Unhealthy;
                }
            }
        };

        if secs_since_bar > Self::UNHEALTHY_THRESHOLD_SECS {
            HealthStatus::Unhealthy
        } else if secs_since_bar > Self::STALE_THRESHOLD_SECS {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Market Source Metrics ===")?;
        writeln!(f, "Uptime:              {:.1}s", self.uptime_secs)?;
        writeln!(f, "Previews received:   {}", self.previews_received)?;
        writeln!(f, "Commits received:    {}", self.commits_received)?;
        writeln!(f, "Messages received:   {}", self.messages_received)?;
        writeln!(f, "Parse errors:        {}", self.parse_errors)?;
        writeln!(f, "WebSocket errors:    {}", self.websocket_errors)?;
        writeln!(f, "Reconnect attempts:  {}", self.reconnect_attempts)?;
        writeln!(f, "Reconnect successes: {}", self.reconnect_successes)?;
        writeln!(f, "Repaired bars:       {}", self.repaired_bars)?;
        writeln!(f, "Repair failures:     {}", self.repair_failures)?;
        if let Some(secs) = self.secs_since_last_bar {
            writeln!(f, "Since last bar:      {:.1}s", secs)?;
        }
        Ok(())
    }
}

/// Shared handle to metrics.
pub type SharedMetrics = Arc<SourceMetrics>;

pub fn create_metrics() -> SharedMetrics {
    Arc::new(SourceMetrics::new())
}
