//! Intents a strategy may emit, and the UI-facing condition checklist.

use model::{CloseReason, PositionSide};
use serde::{Deserialize, Serialize};

/// Request to open a position at the event's decision price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub side: PositionSide,
    pub entry_price: f64,
    pub stop_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub reason: String,
}

/// Request to close (part of) the open position at `price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitAction {
    pub reason: CloseReason,
    pub price: f64,
}

impl ExitAction {
    pub fn new(reason: CloseReason, price: f64) -> Self {
        Self { reason, price }
    }
}

/// At most one of these per event.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyIntent {
    Enter(EntrySignal),
    Exit(ExitAction),
}

/// One boolean clause of the entry logic, for the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRow {
    pub label: String,
    pub ok: bool,
    /// Rendered current value, e.g. "rsi=54.2".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ConditionRow {
    pub fn new(label: impl Into<String>, ok: bool) -> Self {
        Self {
            label: label.into(),
            ok,
            value: None,
        }
    }

    pub fn with_value(label: impl Into<String>, ok: bool, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok,
            value: Some(value.into()),
        }
    }
}

/// Current truth of every entry clause, one list per direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionChecklist {
    pub long: Vec<ConditionRow>,
    pub short: Vec<ConditionRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_row_serializes_without_null_value() {
        let row = ConditionRow::new("trend up", true);
        let json = serde_json::to_string(&row).unwrap();
        assert!(!json.contains("value"));

        let row = ConditionRow::with_value("rsi in band", false, "rsi=71.3");
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("rsi=71.3"));
    }

    #[test]
    fn test_exit_action_reason() {
        let exit = ExitAction::new(CloseReason::Tp1, 105.0);
        assert_eq!(exit.reason, CloseReason::Tp1);
        assert_eq!(exit.price, 105.0);
    }
}
