use std::sync::atomic::{AtomicI64, Ordering};

/// Generates position and trade ids for simulated fills.
///
/// Seeded from the highest persisted ids on startup so a restarted engine
/// keeps appending instead of colliding.
#[derive(Debug)]
pub struct IdGen {
    next_position_id: AtomicI64,
    next_trade_id: AtomicI64,
}

impl IdGen {
    pub fn new(max_position_id: i64, max_trade_id: i64) -> Self {
        Self {
            next_position_id: AtomicI64::new(max_position_id + 1),
            next_trade_id: AtomicI64::new(max_trade_id + 1),
        }
    }

    pub fn next_position_id(&self) -> i64 {
        self.next_position_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_trade_id(&self) -> i64 {
        self.next_trade_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new(0, 0)
    }
}
