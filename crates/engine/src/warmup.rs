//! History warmup: fill the buffers before going live.
//!
//! The DB is consulted first; only the remainder is paged from the exchange,
//! walking `end_time` backwards one page at a time. Fetched bars are
//! persisted idempotently, so re-running warmup never duplicates rows.

use std::collections::HashMap;

use binance_rest::{BinanceRestClient, KLINES_PAGE_LIMIT};
use common::now_ms;
use kline_buffer::KlineBufferManager;
use model::{Bar, Interval};
use storage::{DbHandle, WriteOp};
use tracing::info;

use crate::error::EngineError;

/// What warmup achieved per interval.
#[derive(Debug, Default)]
pub struct WarmupReport {
    /// Bars loaded into each buffer.
    pub loaded: HashMap<Interval, usize>,
    /// Last closed open_time per interval; seeds the connector's gap repair.
    pub tails: HashMap<Interval, i64>,
}

/// Warm every interval's buffer up to `bars_needed`.
pub async fn warmup_all(
    db: &DbHandle,
    rest: &BinanceRestClient,
    buffers: &mut KlineBufferManager,
    symbol: &str,
    intervals: &[Interval],
    bars_needed: &HashMap<Interval, usize>,
) -> Result<WarmupReport, EngineError> {
    let mut report = WarmupReport::default();

    for &interval in intervals {
        let needed = bars_needed.get(&interval).copied().unwrap_or(0);
        let loaded = warmup_interval(db, rest, buffers, symbol, interval, needed).await?;
        report.loaded.insert(interval, loaded);
        if let Ok(buffer) = buffers.buffer(interval) {
            if let Some(tail) = buffer.tail() {
                report.tails.insert(interval, tail.open_time);
            }
        }
    }

    Ok(report)
}

async fn warmup_interval(
    db: &DbHandle,
    rest: &BinanceRestClient,
    buffers: &mut KlineBufferManager,
    symbol: &str,
    interval: Interval,
    bars_needed: usize,
) -> Result<usize, EngineError> {
    info!(symbol = %symbol, interval = %interval, need = bars_needed, "warmup start");

    let mut bars: Vec<Bar> = db
        .recent_klines(symbol, interval, bars_needed)
        .await?
        .into_iter()
        .filter(|b| b.is_closed)
        .collect();
    let from_db = bars.len();

    let mut remaining = bars_needed.saturating_sub(bars.len());
    let mut end_time: Option<i64> = bars.first().map(|b| b.open_time - 1);
    let mut from_rest = 0usize;

    while remaining > 0 {
        let limit = remaining.min(KLINES_PAGE_LIMIT);
        let page = rest
            .fetch_klines(symbol, interval, limit, None, end_time)
            .await
            .map_err(|e| EngineError::Warmup(e.to_string()))?;
        if page.is_empty() {
            // Exchange history exhausted
            break;
        }

        let page_len = page.len();
        for bar in &page {
            db.write(WriteOp::UpsertKline {
                symbol: symbol.to_string(),
                bar: bar.clone(),
                created_at: now_ms(),
            })
            .await;
        }

        end_time = page.first().map(|b| b.open_time - 1);
        from_rest += page_len;
        remaining = remaining.saturating_sub(page_len);
        bars.extend(page);

        if page_len < limit {
            break;
        }
    }

    // Pages arrive newest-window-first; order the merged set before loading
    bars.sort_by_key(|b| b.open_time);
    bars.dedup_by_key(|b| b.open_time);
    let skip = bars.len().saturating_sub(bars_needed);

    let buffer = buffers.buffer_mut(interval)?;
    let mut loaded = 0usize;
    for bar in bars.into_iter().skip(skip) {
        if buffer.append_or_replace_last(bar).is_ok() {
            loaded += 1;
        }
    }

    info!(
        symbol = %symbol,
        interval = %interval,
        total = loaded,
        db = from_db,
        rest = from_rest,
        "warmup done"
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Bar, BarSource};
    use storage::{spawn_db, Store, WriteOp};

    fn bar(i: i64, close: f64) -> Bar {
        Bar {
            interval: Interval::M15,
            open_time: i * 900_000,
            close_time: (i + 1) * 900_000 - 1,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            trades: 1,
            is_closed: true,
            source: BarSource::Rest,
        }
    }

    #[tokio::test]
    async fn test_warmup_satisfied_from_db_without_fetching() {
        let db = spawn_db(Store::open_in_memory().unwrap());
        for i in 0..10 {
            db.write(WriteOp::UpsertKline {
                symbol: "BTCUSDT".to_string(),
                bar: bar(i, 100.0 + i as f64),
                created_at: 1,
            })
            .await;
        }
        db.flush().await;

        // Unroutable base URL: any network attempt would error the warmup
        let rest = BinanceRestClient::new("http://127.0.0.1:1").unwrap();
        let caps = std::collections::HashMap::from([(Interval::M15, 100)]);
        let mut buffers = kline_buffer::KlineBufferManager::new(&caps);
        let needed = std::collections::HashMap::from([(Interval::M15, 8usize)]);

        let report = warmup_all(&db, &rest, &mut buffers, "BTCUSDT", &[Interval::M15], &needed)
            .await
            .unwrap();

        assert_eq!(report.loaded[&Interval::M15], 8);
        // Tail is the newest closed bar
        assert_eq!(report.tails[&Interval::M15], 9 * 900_000);
        let buffer = buffers.buffer(Interval::M15).unwrap();
        assert_eq!(buffer.len(), 8);
        // The oldest two bars fell outside the requested window
        assert_eq!(buffer.iter().next().unwrap().open_time, 2 * 900_000);
    }
}
