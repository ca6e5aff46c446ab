//! Position and account state for one strategy instance.

use serde::{Deserialize, Serialize};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            _ => None,
        }
    }

    /// +1.0 for long, -1.0 for short. PnL = (exit - entry) * qty * dir.
    pub fn dir(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

/// An open position. At most one exists per strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub position_id: i64,
    pub side: PositionSide,
    /// Remaining quantity, always > 0 while open.
    pub qty: f64,
    /// Quantity at entry, before any partial close.
    pub full_qty: f64,
    pub entry_price: f64,
    pub entry_time_ms: i64,
    pub leverage: f64,
    /// Margin still reserved for the remaining quantity.
    pub margin: f64,
    pub stop_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub tp1_hit: bool,
    pub liq_price: f64,
    pub realized_pnl: f64,
    pub fees_total: f64,
}

impl PositionState {
    /// Unrealized PnL of the remaining quantity at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.qty * self.side.dir()
    }

    pub fn notional(&self, price: f64) -> f64 {
        self.qty * price
    }
}

/// Per-strategy account view. Derived fields are refreshed on every price
/// update: `equity = balance + upl`, `free_margin = equity - margin_used`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub upl: f64,
    pub margin_used: f64,
    pub free_margin: f64,
}

impl AccountState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            balance: initial_capital,
            equity: initial_capital,
            upl: 0.0,
            margin_used: 0.0,
            free_margin: initial_capital,
        }
    }
}
