use model::{AccountState, PositionState};

/// One strategy's virtual account: balance plus the open position, if any.
///
/// Owned exclusively by that strategy's slot in the engine loop; everyone
/// else sees copies published through the fan-out bus.
#[derive(Debug, Clone)]
pub struct SimAccount {
    pub state: AccountState,
    pub position: Option<PositionState>,
    pub initial_capital: f64,
}

impl SimAccount {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            state: AccountState::new(initial_capital),
            position: None,
            initial_capital,
        }
    }

    /// Recompute the derived fields at `price`:
    /// `equity = balance + upl`, `margin_used = sum(open.margin)`,
    /// `free_margin = equity - margin_used`.
    pub fn refresh(&mut self, price: f64) {
        let (upl, margin_used) = match &self.position {
            Some(pos) => (pos.unrealized_pnl(price), pos.margin),
            None => (0.0, 0.0),
        };
        self.state.upl = upl;
        self.state.equity = self.state.balance + upl;
        self.state.margin_used = margin_used;
        self.state.free_margin = self.state.equity - margin_used;
    }

    /// Reset to the initial capital with no position.
    pub fn reset(&mut self) {
        self.state = AccountState::new(self.initial_capital);
        self.position = None;
    }
}
