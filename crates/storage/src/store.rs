//! Synchronous SQLite store. Only the writer task touches this directly.

use model::{
    Bar, BarSource, EquitySnapshot, Interval, LedgerRecord, LedgerType, PositionSide, TradeKind,
    TradeRecord, TradeSide,
};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::rows::{AlertRow, PositionRow, PositionStatus};
use crate::schema::SCHEMA;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ── Writes ──────────────────────────────────────────────────────────

    pub fn upsert_kline(&self, symbol: &str, bar: &Bar, created_at: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO klines (
               symbol, interval, open_time, close_time, open, high, low, close,
               volume, trades, is_closed, source, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(symbol, interval, open_time) DO UPDATE SET
               close_time=excluded.close_time,
               open=excluded.open,
               high=excluded.high,
               low=excluded.low,
               close=excluded.close,
               volume=excluded.volume,
               trades=excluded.trades,
               is_closed=excluded.is_closed,
               source=excluded.source,
               created_at=excluded.created_at",
            params![
                symbol,
                bar.interval.as_str(),
                bar.open_time,
                bar.close_time,
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume,
                bar.trades,
                bar.is_closed as i64,
                bar.source.as_str(),
                created_at,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_position(&self, row: &PositionRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO positions (
               position_id, strategy, symbol, side, qty, entry_price, entry_time,
               leverage, margin, stop_price, tp1_price, tp2_price, status,
               realized_pnl, fees_total, liq_price, close_time, close_reason, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(position_id) DO UPDATE SET
               qty=excluded.qty,
               margin=excluded.margin,
               stop_price=excluded.stop_price,
               tp1_price=excluded.tp1_price,
               tp2_price=excluded.tp2_price,
               status=excluded.status,
               realized_pnl=excluded.realized_pnl,
               fees_total=excluded.fees_total,
               liq_price=excluded.liq_price,
               close_time=excluded.close_time,
               close_reason=excluded.close_reason,
               updated_at=excluded.updated_at",
            params![
                row.position_id,
                row.strategy,
                row.symbol,
                row.side.as_str(),
                row.qty,
                row.entry_price,
                row.entry_time_ms,
                row.leverage,
                row.margin,
                row.stop_price,
                row.tp1_price,
                row.tp2_price,
                row.status.as_str(),
                row.realized_pnl,
                row.fees_total,
                row.liq_price,
                row.close_time_ms,
                row.close_reason,
                row.updated_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn insert_trade(&self, t: &TradeRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO trades (
               trade_id, strategy, symbol, position_id, side, trade_type, price,
               qty, notional, fee_amount, fee_rate, timestamp, reason
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                t.trade_id,
                t.strategy,
                t.symbol,
                t.position_id,
                t.side.as_str(),
                t.kind.as_str(),
                t.price,
                t.qty,
                t.notional,
                t.fee_amount,
                t.fee_rate,
                t.ts_ms,
                t.reason,
            ],
        )?;
        Ok(())
    }

    pub fn insert_ledger(&self, l: &LedgerRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO ledger (strategy, timestamp, type, amount, symbol, ref, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                l.strategy,
                l.ts_ms,
                l.entry_type.as_str(),
                l.amount,
                l.symbol,
                l.r#ref,
                l.note,
            ],
        )?;
        Ok(())
    }

    pub fn insert_equity(&self, s: &EquitySnapshot) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO equity_snapshots (strategy, timestamp, balance, equity, upl, margin_used, free_margin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                s.strategy,
                s.ts_ms,
                s.balance,
                s.equity,
                s.upl,
                s.margin_used,
                s.free_margin,
            ],
        )?;
        Ok(())
    }

    pub fn insert_alert(&self, a: &AlertRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO alerts (strategy, timestamp, channel, level, message, dedup_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![a.strategy, a.ts_ms, a.channel, a.level, a.message, a.dedup_key],
        )?;
        Ok(())
    }

    pub fn app_state_set(&self, key: &str, value: &str, updated_at: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO app_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
            params![key, value, updated_at],
        )?;
        Ok(())
    }

    /// Delete every row belonging to one strategy in a single transaction.
    pub fn reset_strategy(&mut self, strategy: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM trades WHERE strategy=?1", params![strategy])?;
        tx.execute("DELETE FROM ledger WHERE strategy=?1", params![strategy])?;
        tx.execute(
            "DELETE FROM equity_snapshots WHERE strategy=?1",
            params![strategy],
        )?;
        tx.execute("DELETE FROM positions WHERE strategy=?1", params![strategy])?;
        tx.commit()?;
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Last `limit` bars, chronological.
    pub fn recent_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Bar>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT open_time, close_time, open, high, low, close, volume, trades, is_closed, source
             FROM klines
             WHERE symbol=?1 AND interval=?2
             ORDER BY open_time DESC
             LIMIT ?3",
        )?;

        let mut bars: Vec<Bar> = stmt
            .query_map(params![symbol, interval.as_str(), limit as i64], |row| {
                let source: String = row.get(9)?;
                Ok(Bar {
                    interval,
                    open_time: row.get(0)?,
                    close_time: row.get(1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                    trades: row.get(7)?,
                    is_closed: row.get::<_, i64>(8)? != 0,
                    source: if source == "ws" {
                        BarSource::Ws
                    } else {
                        BarSource::Rest
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        bars.reverse();
        Ok(bars)
    }

    pub fn kline_count(&self, symbol: &str, interval: Interval) -> Result<i64, StoreError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM klines WHERE symbol=?1 AND interval=?2",
            params![symbol, interval.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Newest-first page of trades.
    pub fn trades_page(
        &self,
        strategy: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TradeRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT trade_id, strategy, symbol, position_id, side, trade_type, price,
                    qty, notional, fee_amount, fee_rate, timestamp, reason
             FROM trades WHERE strategy=?1
             ORDER BY timestamp DESC, trade_id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt
            .query_map(params![strategy, limit as i64, offset as i64], |row| {
                let side: String = row.get(4)?;
                let kind: String = row.get(5)?;
                Ok(TradeRecord {
                    trade_id: row.get(0)?,
                    strategy: row.get(1)?,
                    symbol: row.get(2)?,
                    position_id: row.get(3)?,
                    side: if side == "BUY" {
                        TradeSide::Buy
                    } else {
                        TradeSide::Sell
                    },
                    kind: if kind == "ENTRY" {
                        TradeKind::Entry
                    } else {
                        TradeKind::Exit
                    },
                    price: row.get(6)?,
                    qty: row.get(7)?,
                    notional: row.get(8)?,
                    fee_amount: row.get(9)?,
                    fee_rate: row.get(10)?,
                    ts_ms: row.get(11)?,
                    reason: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Newest-first page of ledger rows.
    pub fn ledger_page(
        &self,
        strategy: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT strategy, timestamp, type, amount, symbol, ref, note
             FROM ledger WHERE strategy=?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt
            .query_map(params![strategy, limit as i64, offset as i64], |row| {
                let entry_type: String = row.get(2)?;
                Ok(LedgerRecord {
                    strategy: row.get(0)?,
                    ts_ms: row.get(1)?,
                    entry_type: match entry_type.as_str() {
                        "fee" => LedgerType::Fee,
                        "funding" => LedgerType::Funding,
                        _ => LedgerType::RealizedPnl,
                    },
                    amount: row.get(3)?,
                    symbol: row.get(4)?,
                    r#ref: row.get(5)?,
                    note: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Newest-first page of equity snapshots.
    pub fn equity_page(
        &self,
        strategy: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EquitySnapshot>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT strategy, timestamp, balance, equity, upl, margin_used, free_margin
             FROM equity_snapshots WHERE strategy=?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt
            .query_map(params![strategy, limit as i64, offset as i64], |row| {
                Ok(EquitySnapshot {
                    strategy: row.get(0)?,
                    ts_ms: row.get(1)?,
                    balance: row.get(2)?,
                    equity: row.get(3)?,
                    upl: row.get(4)?,
                    margin_used: row.get(5)?,
                    free_margin: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The most recent OPEN position for a strategy, if any.
    pub fn open_position(
        &self,
        symbol: &str,
        strategy: &str,
    ) -> Result<Option<PositionRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT position_id, strategy, symbol, side, qty, entry_price, entry_time,
                    leverage, margin, stop_price, tp1_price, tp2_price, status,
                    realized_pnl, fees_total, liq_price, close_time, close_reason, updated_at
             FROM positions
             WHERE status='OPEN' AND symbol=?1 AND strategy=?2
             ORDER BY entry_time DESC LIMIT 1",
        )?;

        let row = stmt
            .query_row(params![symbol, strategy], |row| {
                let side: String = row.get(3)?;
                let status: String = row.get(12)?;
                Ok(PositionRow {
                    position_id: row.get(0)?,
                    strategy: row.get(1)?,
                    symbol: row.get(2)?,
                    side: PositionSide::from_str_opt(&side).unwrap_or(PositionSide::Long),
                    qty: row.get(4)?,
                    entry_price: row.get(5)?,
                    entry_time_ms: row.get(6)?,
                    leverage: row.get(7)?,
                    margin: row.get(8)?,
                    stop_price: row.get(9)?,
                    tp1_price: row.get(10)?,
                    tp2_price: row.get(11)?,
                    status: if status == "OPEN" {
                        PositionStatus::Open
                    } else {
                        PositionStatus::Closed
                    },
                    realized_pnl: row.get(13)?,
                    fees_total: row.get(14)?,
                    liq_price: row.get(15)?,
                    close_time_ms: row.get(16)?,
                    close_reason: row.get(17)?,
                    updated_at_ms: row.get(18)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Latest persisted equity for a strategy.
    pub fn latest_equity(&self, strategy: &str) -> Result<Option<EquitySnapshot>, StoreError> {
        Ok(self.equity_page(strategy, 1, 0)?.pop())
    }

    /// Highest ids across positions and trades, for seeding the id counters.
    pub fn max_ids(&self) -> Result<(i64, i64), StoreError> {
        let max_pos: Option<i64> = self
            .conn
            .query_row("SELECT MAX(position_id) FROM positions", [], |r| r.get(0))?;
        let max_trade: Option<i64> = self
            .conn
            .query_row("SELECT MAX(trade_id) FROM trades", [], |r| r.get(0))?;
        Ok((max_pos.unwrap_or(0), max_trade.unwrap_or(0)))
    }

    /// True if a ledger row with this type and ref already exists (used to
    /// deduplicate funding applications across restarts).
    pub fn has_ledger_ref(
        &self,
        strategy: &str,
        entry_type: LedgerType,
        r#ref: &str,
    ) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM ledger WHERE strategy=?1 AND type=?2 AND ref=?3 LIMIT 1",
                params![strategy, entry_type.as_str(), r#ref],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn app_state_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM app_state WHERE key=?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::PositionRow;
    use model::PositionState;

    fn bar(open_time: i64, close: f64, closed: bool) -> Bar {
        Bar {
            interval: Interval::M15,
            open_time,
            close_time: open_time + 899_999,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            trades: 1,
            is_closed: closed,
            source: BarSource::Rest,
        }
    }

    fn position(id: i64) -> PositionState {
        PositionState {
            position_id: id,
            side: PositionSide::Long,
            qty: 1.0,
            full_qty: 1.0,
            entry_price: 100.0,
            entry_time_ms: 1_000,
            leverage: 20.0,
            margin: 5.0,
            stop_price: 95.0,
            tp1_price: 105.0,
            tp2_price: 110.0,
            tp1_hit: false,
            liq_price: 90.0,
            realized_pnl: 0.0,
            fees_total: 0.0,
        }
    }

    #[test]
    fn test_kline_upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();

        store.upsert_kline("BTCUSDT", &bar(0, 100.0, true), 1).unwrap();
        store.upsert_kline("BTCUSDT", &bar(0, 101.0, true), 2).unwrap();
        store.upsert_kline("BTCUSDT", &bar(900_000, 102.0, true), 3).unwrap();

        assert_eq!(store.kline_count("BTCUSDT", Interval::M15).unwrap(), 2);
        let bars = store.recent_klines("BTCUSDT", Interval::M15, 10).unwrap();
        assert_eq!(bars[0].close, 101.0); // second write replaced the first
        assert_eq!(bars[1].close, 102.0);
    }

    #[test]
    fn test_position_roundtrip_and_close() {
        let store = Store::open_in_memory().unwrap();
        let pos = position(1);

        store
            .upsert_position(&PositionRow::open("default", "BTCUSDT", &pos, 10))
            .unwrap();

        let loaded = store.open_position("BTCUSDT", "default").unwrap().unwrap();
        assert_eq!(loaded.position_id, 1);
        assert_eq!(loaded.status, PositionStatus::Open);
        assert_eq!(loaded.to_state().qty, 1.0);
        assert!(!loaded.to_state().tp1_hit);

        store
            .upsert_position(&PositionRow::closed(
                "default",
                "BTCUSDT",
                &pos,
                model::CloseReason::Stop,
                20,
            ))
            .unwrap();
        assert!(store.open_position("BTCUSDT", "default").unwrap().is_none());
    }

    #[test]
    fn test_restore_detects_tp1_from_breakeven_stop() {
        let store = Store::open_in_memory().unwrap();
        let mut pos = position(2);
        pos.qty = 0.5;
        pos.stop_price = pos.entry_price;

        store
            .upsert_position(&PositionRow::open("default", "BTCUSDT", &pos, 10))
            .unwrap();

        let state = store
            .open_position("BTCUSDT", "default")
            .unwrap()
            .unwrap()
            .to_state();
        assert!(state.tp1_hit);
        assert_eq!(state.full_qty, 1.0);
    }

    #[test]
    fn test_reset_is_scoped_by_strategy() {
        let mut store = Store::open_in_memory().unwrap();

        for sid in ["a", "b"] {
            store
                .insert_ledger(&LedgerRecord {
                    strategy: sid.to_string(),
                    ts_ms: 1,
                    entry_type: LedgerType::Fee,
                    amount: -1.0,
                    symbol: "BTCUSDT".to_string(),
                    r#ref: "1".to_string(),
                    note: "entry fee".to_string(),
                })
                .unwrap();
            store
                .insert_equity(&EquitySnapshot {
                    strategy: sid.to_string(),
                    ts_ms: 1,
                    balance: 1000.0,
                    equity: 1000.0,
                    upl: 0.0,
                    margin_used: 0.0,
                    free_margin: 1000.0,
                })
                .unwrap();
        }

        store.reset_strategy("a").unwrap();

        assert!(store.ledger_page("a", 10, 0).unwrap().is_empty());
        assert_eq!(store.ledger_page("b", 10, 0).unwrap().len(), 1);
        assert_eq!(store.equity_page("b", 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_max_ids_empty_and_seeded() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.max_ids().unwrap(), (0, 0));

        store
            .upsert_position(&PositionRow::open("default", "BTCUSDT", &position(7), 1))
            .unwrap();
        assert_eq!(store.max_ids().unwrap().0, 7);
    }

    #[test]
    fn test_ledger_ref_dedup() {
        let store = Store::open_in_memory().unwrap();
        let row = LedgerRecord {
            strategy: "default".to_string(),
            ts_ms: 123,
            entry_type: LedgerType::Funding,
            amount: 0.5,
            symbol: "BTCUSDT".to_string(),
            r#ref: "1672531200000".to_string(),
            note: "rate=0.0001".to_string(),
        };
        assert!(!store
            .has_ledger_ref("default", LedgerType::Funding, &row.r#ref)
            .unwrap());
        store.insert_ledger(&row).unwrap();
        assert!(store
            .has_ledger_ref("default", LedgerType::Funding, &row.r#ref)
            .unwrap());
    }

    #[test]
    fn test_app_state_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.app_state_get("last_shutdown_ms").unwrap().is_none());
        store.app_state_set("last_shutdown_ms", "12345", 1).unwrap();
        store.app_state_set("last_shutdown_ms", "67890", 2).unwrap();
        assert_eq!(
            store.app_state_get("last_shutdown_ms").unwrap().unwrap(),
            "67890"
        );
    }

    #[test]
    fn test_pagination_newest_first() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .insert_trade(&TradeRecord {
                    trade_id: i + 1,
                    strategy: "default".to_string(),
                    symbol: "BTCUSDT".to_string(),
                    position_id: 1,
                    side: TradeSide::Buy,
                    kind: TradeKind::Entry,
                    price: 100.0,
                    qty: 1.0,
                    notional: 100.0,
                    fee_amount: 0.04,
                    fee_rate: 0.0004,
                    ts_ms: 1000 + i,
                    reason: "signal_long".to_string(),
                })
                .unwrap();
        }

        let page = store.trades_page("default", 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].trade_id, 5);

        let page = store.trades_page("default", 2, 2).unwrap();
        assert_eq!(page[0].trade_id, 3);
    }
}
