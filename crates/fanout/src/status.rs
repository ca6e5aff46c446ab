use std::collections::HashMap;

use common::now_ms;
use model::{AccountState, PositionSide, PositionState};
use parking_lot::RwLock;
use serde::Serialize;

/// The position fields the status surface exposes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PositionBrief {
    pub side: PositionSide,
    pub qty: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
}

impl From<&PositionState> for PositionBrief {
    fn from(pos: &PositionState) -> Self {
        Self {
            side: pos.side,
            qty: pos.qty,
            entry_price: pos.entry_price,
            stop_price: pos.stop_price,
            tp1_price: pos.tp1_price,
            tp2_price: pos.tp2_price,
        }
    }
}

/// One strategy's account snapshot as served to clients.
#[derive(Debug, Clone, Serialize, Default)]
pub struct StrategyStatus {
    pub timestamp: i64,
    pub balance: f64,
    pub equity: f64,
    pub upl: f64,
    pub margin_used: f64,
    pub free_margin: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liq_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionBrief>,
    pub cooldown_bars: u32,
}

impl StrategyStatus {
    pub fn from_account(
        account: &AccountState,
        position: Option<&PositionState>,
        cooldown_bars: u32,
    ) -> Self {
        Self {
            timestamp: now_ms(),
            balance: account.balance,
            equity: account.equity,
            upl: account.upl,
            margin_used: account.margin_used,
            free_margin: account.free_margin,
            liq_price: position.map(|p| p.liq_price),
            position: position.map(PositionBrief::from),
            cooldown_bars,
        }
    }
}

/// Latest-wins status per strategy. Writers replace, readers copy; there is
/// no queue to back up.
#[derive(Debug, Default)]
pub struct StatusStore {
    inner: RwLock<HashMap<String, StrategyStatus>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, strategy: &str, status: StrategyStatus) {
        self.inner.write().insert(strategy.to_string(), status);
    }

    pub fn get(&self, strategy: &str) -> Option<StrategyStatus> {
        self.inner.read().get(strategy).cloned()
    }

    pub fn all(&self) -> HashMap<String, StrategyStatus> {
        self.inner.read().clone()
    }

    pub fn remove(&self, strategy: &str) {
        self.inner.write().remove(strategy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_wins() {
        let store = StatusStore::new();

        let mut s = StrategyStatus::default();
        s.balance = 1000.0;
        store.update("default", s.clone());

        s.balance = 900.0;
        store.update("default", s);

        assert_eq!(store.get("default").unwrap().balance, 900.0);
        assert!(store.get("other").is_none());
    }

    #[test]
    fn test_status_reflects_position() {
        let account = AccountState::new(1000.0);
        let status = StrategyStatus::from_account(&account, None, 2);
        assert!(status.position.is_none());
        assert!(status.liq_price.is_none());
        assert_eq!(status.cooldown_bars, 2);
        assert_eq!(status.free_margin, 1000.0);
    }
}
