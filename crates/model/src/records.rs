//! Persisted row shapes: trades, ledger entries, equity snapshots.

use serde::{Deserialize, Serialize};

/// Order side of a simulated fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Whether a fill opened or reduced a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeKind {
    #[serde(rename = "ENTRY")]
    Entry,
    #[serde(rename = "EXIT")]
    Exit,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "ENTRY",
            Self::Exit => "EXIT",
        }
    }
}

/// Why a position (or part of it) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Stop,
    Tp1,
    Tp2,
    TrendFail,
    Liq,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Tp1 => "tp1",
            Self::Tp2 => "tp2",
            Self::TrendFail => "trend_fail",
            Self::Liq => "liq",
        }
    }
}

/// One simulated fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: i64,
    pub strategy: String,
    pub symbol: String,
    pub position_id: i64,
    pub side: TradeSide,
    pub kind: TradeKind,
    pub price: f64,
    pub qty: f64,
    pub notional: f64,
    pub fee_amount: f64,
    pub fee_rate: f64,
    pub ts_ms: i64,
    pub reason: String,
}

/// Kind of a balance-changing ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerType {
    Fee,
    RealizedPnl,
    Funding,
}

impl LedgerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fee => "fee",
            Self::RealizedPnl => "realized_pnl",
            Self::Funding => "funding",
        }
    }
}

/// Append-only record of every balance change. The accounting identity
/// `initial_capital + sum(amount) == balance` must hold at all times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub strategy: String,
    pub ts_ms: i64,
    pub entry_type: LedgerType,
    /// Signed: fees negative, profits positive.
    pub amount: f64,
    pub symbol: String,
    /// Correlates with the trade id or funding timestamp that produced it.
    pub r#ref: String,
    pub note: String,
}

/// Point-in-time account snapshot, appended after every balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub strategy: String,
    pub ts_ms: i64,
    pub balance: f64,
    pub equity: f64,
    pub upl: f64,
    pub margin_used: f64,
    pub free_margin: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_strings() {
        assert_eq!(CloseReason::Stop.as_str(), "stop");
        assert_eq!(CloseReason::TrendFail.as_str(), "trend_fail");
        assert_eq!(CloseReason::Liq.as_str(), "liq");
    }

    #[test]
    fn test_ledger_type_serde() {
        let j = serde_json::to_string(&LedgerType::RealizedPnl).unwrap();
        assert_eq!(j, "\"realized_pnl\"");
    }

    #[test]
    fn test_trade_side_strings() {
        assert_eq!(TradeSide::Buy.as_str(), "BUY");
        assert_eq!(TradeKind::Exit.as_str(), "EXIT");
    }
}
