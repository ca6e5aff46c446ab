use std::collections::{HashMap, VecDeque};

use common::now_ms;
use indicators::IndicatorSnapshot;
use model::{Bar, PositionSide, TradeRecord};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use strategy_core::ConditionChecklist;

/// Ring capacity; the oldest events are dropped under pressure.
const EVENT_RING: usize = 500;

/// How many trailing events a frame carries.
const EVENTS_PER_FRAME: usize = 50;

/// Strategy lifecycle events pushed over the stream channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Entry {
        sid: String,
        side: PositionSide,
        price: f64,
        ts: i64,
        reason: String,
    },
    Tp1 {
        sid: String,
        side: PositionSide,
        price: f64,
        ts: i64,
    },
    Tp2 {
        sid: String,
        side: PositionSide,
        price: f64,
        ts: i64,
    },
    Exit {
        sid: String,
        side: PositionSide,
        price: f64,
        ts: i64,
        reason: String,
    },
    Liq {
        sid: String,
        price: f64,
        ts: i64,
    },
    Trade {
        sid: String,
        trade: TradeRecord,
    },
}

impl StreamEvent {
    fn sid(&self) -> &str {
        match self {
            Self::Entry { sid, .. }
            | Self::Tp1 { sid, .. }
            | Self::Tp2 { sid, .. }
            | Self::Exit { sid, .. }
            | Self::Liq { sid, .. }
            | Self::Trade { sid, .. } => sid,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct StrategySlot {
    kline: Option<Value>,
    indicators: Option<IndicatorSnapshot>,
    conditions: Option<ConditionChecklist>,
}

#[derive(Debug, Default)]
struct StreamInner {
    slots: HashMap<String, StrategySlot>,
    events: VecDeque<StreamEvent>,
    ts: i64,
}

/// Merged live view per strategy (open bar, live indicators, condition
/// checklist) plus the trailing event ring. Subscriber sessions poll frames
/// out of this at their configured cadence.
#[derive(Debug, Default)]
pub struct StreamStore {
    inner: RwLock<StreamInner>,
}

impl StreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_kline(&self, strategy: &str, bar: &Bar) {
        let k = json!({
            "t": bar.open_time,
            "T": bar.close_time,
            "o": bar.open,
            "h": bar.high,
            "l": bar.low,
            "c": bar.close,
            "v": bar.volume,
            "x": bar.is_closed,
            "i": bar.interval.as_str(),
        });
        let mut inner = self.inner.write();
        inner.slots.entry(strategy.to_string()).or_default().kline = Some(k);
        inner.ts = now_ms();
    }

    pub fn update_indicators(&self, strategy: &str, snapshot: IndicatorSnapshot) {
        let mut inner = self.inner.write();
        inner
            .slots
            .entry(strategy.to_string())
            .or_default()
            .indicators = Some(snapshot);
        inner.ts = now_ms();
    }

    pub fn update_conditions(&self, strategy: &str, checklist: ConditionChecklist) {
        let mut inner = self.inner.write();
        inner
            .slots
            .entry(strategy.to_string())
            .or_default()
            .conditions = Some(checklist);
        inner.ts = now_ms();
    }

    pub fn push_event(&self, event: StreamEvent) {
        let mut inner = self.inner.write();
        inner.events.push_back(event);
        while inner.events.len() > EVENT_RING {
            inner.events.pop_front();
        }
        inner.ts = now_ms();
    }

    /// Latest condition checklist per strategy.
    pub fn conditions(&self) -> HashMap<String, ConditionChecklist> {
        let inner = self.inner.read();
        inner
            .slots
            .iter()
            .filter_map(|(sid, slot)| slot.conditions.clone().map(|c| (sid.clone(), c)))
            .collect()
    }

    /// One coalesced frame: per-strategy `{k, i, cond}` plus trailing events.
    pub fn frame(&self) -> Value {
        let inner = self.inner.read();
        let strategies: Value = inner
            .slots
            .iter()
            .map(|(sid, slot)| {
                (
                    sid.clone(),
                    json!({
                        "k": slot.kline,
                        "i": slot.indicators,
                        "cond": slot.conditions,
                    }),
                )
            })
            .collect::<serde_json::Map<String, Value>>()
            .into();

        let skip = inner.events.len().saturating_sub(EVENTS_PER_FRAME);
        let events: Vec<Value> = inner
            .events
            .iter()
            .skip(skip)
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
            .collect();

        json!({
            "ts": inner.ts,
            "strategies": strategies,
            "ev": events,
        })
    }

    /// Forget everything about one strategy (scoped reset).
    pub fn reset_strategy(&self, strategy: &str) {
        let mut inner = self.inner.write();
        inner.slots.remove(strategy);
        inner.events.retain(|e| e.sid() != strategy);
        inner.ts = now_ms();
    }
}
