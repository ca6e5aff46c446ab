//! Funding-rate poller.
//!
//! Polls the exchange for the latest funding record and forwards fresh ones
//! to the engine loop, which owns the accounts. Failures are logged and the
//! poller tries again next tick.

use std::sync::Arc;
use std::time::Duration;

use binance_rest::BinanceRestClient;
use common::now_ms;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::command::EngineCommand;

const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// A funding record older than this is assumed to be already applied.
const FRESHNESS_WINDOW_MS: i64 = 3 * 60 * 1000;

pub async fn run_funding_task(
    rest: Arc<BinanceRestClient>,
    symbol: String,
    commands: mpsc::Sender<EngineCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("funding task stopped");
                    return;
                }
            }

            _ = ticker.tick() => {
                match rest.latest_funding_rate(&symbol).await {
                    Ok(Some(rate)) => {
                        if (now_ms() - rate.funding_time).abs() > FRESHNESS_WINDOW_MS {
                            debug!(funding_time = rate.funding_time, "funding record stale, skipping");
                            continue;
                        }
                        let cmd = EngineCommand::ApplyFunding {
                            rate: rate.funding_rate,
                            funding_time_ms: rate.funding_time,
                        };
                        if commands.send(cmd).await.is_err() {
                            info!("engine gone, funding task exiting");
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "funding rate fetch failed"),
                }
            }
        }
    }
}
