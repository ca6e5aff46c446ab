//! Row shapes that only exist at the persistence boundary.

use model::{CloseReason, PositionSide, PositionState};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }
}

/// The positions table row: the one mutable table in the schema.
#[derive(Debug, Clone, Serialize)]
pub struct PositionRow {
    pub position_id: i64,
    pub strategy: String,
    pub symbol: String,
    pub side: PositionSide,
    pub qty: f64,
    pub entry_price: f64,
    pub entry_time_ms: i64,
    pub leverage: f64,
    pub margin: f64,
    pub stop_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub status: PositionStatus,
    pub realized_pnl: f64,
    pub fees_total: f64,
    pub liq_price: f64,
    pub close_time_ms: Option<i64>,
    pub close_reason: Option<String>,
    pub updated_at_ms: i64,
}

impl PositionRow {
    /// Row for a live position.
    pub fn open(strategy: &str, symbol: &str, pos: &PositionState, now_ms: i64) -> Self {
        Self {
            position_id: pos.position_id,
            strategy: strategy.to_string(),
            symbol: symbol.to_string(),
            side: pos.side,
            qty: pos.qty,
            entry_price: pos.entry_price,
            entry_time_ms: pos.entry_time_ms,
            leverage: pos.leverage,
            margin: pos.margin,
            stop_price: pos.stop_price,
            tp1_price: pos.tp1_price,
            tp2_price: pos.tp2_price,
            status: PositionStatus::Open,
            realized_pnl: pos.realized_pnl,
            fees_total: pos.fees_total,
            liq_price: pos.liq_price,
            close_time_ms: None,
            close_reason: None,
            updated_at_ms: now_ms,
        }
    }

    /// Row for a position that just fully closed.
    pub fn closed(
        strategy: &str,
        symbol: &str,
        pos: &PositionState,
        reason: CloseReason,
        now_ms: i64,
    ) -> Self {
        let mut row = Self::open(strategy, symbol, pos, now_ms);
        row.qty = 0.0;
        row.status = PositionStatus::Closed;
        row.close_time_ms = Some(now_ms);
        row.close_reason = Some(reason.as_str().to_string());
        row
    }

    /// Rebuild the in-memory position from a recovered OPEN row.
    ///
    /// `tp1_hit` is not a column: a stop sitting at the entry price means the
    /// first target already fired, and the original size was twice the rest.
    pub fn to_state(&self) -> PositionState {
        let tp1_hit = self.stop_price == self.entry_price;
        PositionState {
            position_id: self.position_id,
            side: self.side,
            qty: self.qty,
            full_qty: if tp1_hit { self.qty * 2.0 } else { self.qty },
            entry_price: self.entry_price,
            entry_time_ms: self.entry_time_ms,
            leverage: self.leverage,
            margin: self.margin,
            stop_price: self.stop_price,
            tp1_price: self.tp1_price,
            tp2_price: self.tp2_price,
            tp1_hit,
            liq_price: self.liq_price,
            realized_pnl: self.realized_pnl,
            fees_total: self.fees_total,
        }
    }
}

/// One alert delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRow {
    pub strategy: String,
    pub ts_ms: i64,
    pub channel: String,
    pub level: String,
    pub message: String,
    pub dedup_key: Option<String>,
}
