//! End-to-end pipeline tests over synthetic bar sequences.
//!
//! Events are driven straight into the engine; assertions read the same
//! stores and DAO the live system serves from.

use std::collections::HashMap;
use std::sync::Arc;

use alerts::{AlertManager, AlertsConfig};
use engine::strategies::{create_strategy, StrategyTuning};
use engine::{Engine, EngineCommand, EngineConfig, StrategySpec};
use execution_sim::{resolve_preview_exit, IdGen, RiskParams, SimBroker, SimParams};
use fanout::{StatusStore, StreamStore};
use indicators::IndicatorConfig;
use kline_buffer::KlineBufferManager;
use model::{
    Bar, BarEvent, BarSource, CloseReason, Interval, LedgerType, PositionSide, TradeKind,
};
use storage::{spawn_db, DbHandle, PositionStatus, Store};
use strategy_core::{
    BoxedStrategy, ConditionChecklist, EntrySignal, EvalCtx, ExitAction, Strategy, StrategyIntent,
};
use tokio::sync::oneshot;

const EXEC: Interval = Interval::M15;
const TREND: Interval = Interval::H1;

// ── Scripted strategy ────────────────────────────────────────────────────
//
// Deterministic stand-in: goes long on every execution commit it is allowed
// to, with fixed distances, and manages the position like the shipped
// strategies do. Lets the tests drive exact fill sequences.

struct ScriptedStrategy {
    id: String,
    stop_distance: f64,
    /// When set, the position is closed with this reason on the next commit.
    exit_on_next_commit: Option<CloseReason>,
    entries: usize,
}

impl ScriptedStrategy {
    fn new(id: &str, stop_distance: f64) -> Self {
        Self {
            id: id.to_string(),
            stop_distance,
            exit_on_next_commit: None,
            entries: 0,
        }
    }
}

impl Strategy for ScriptedStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn on_bar_commit(&mut self, ctx: &EvalCtx<'_>) -> Option<StrategyIntent> {
        if ctx.interval != EXEC {
            return None;
        }
        if ctx.position.is_some() {
            if let Some(reason) = self.exit_on_next_commit.take() {
                return Some(StrategyIntent::Exit(ExitAction::new(reason, ctx.bar.close)));
            }
            return None;
        }
        if ctx.cooldown_bars_remaining > 0 {
            return None;
        }

        let entry = ctx.bar.close;
        let stop = entry - self.stop_distance;
        self.entries += 1;
        Some(StrategyIntent::Enter(EntrySignal {
            side: PositionSide::Long,
            entry_price: entry,
            stop_price: stop,
            tp1_price: entry + self.stop_distance,
            tp2_price: entry + 2.0 * self.stop_distance,
            reason: "signal_long".to_string(),
        }))
    }

    fn on_bar_preview(&mut self, ctx: &EvalCtx<'_>) -> Option<ExitAction> {
        if ctx.interval != EXEC {
            return None;
        }
        resolve_preview_exit(ctx.position?, ctx.bar)
    }

    fn describe_conditions(&self, _ctx: &EvalCtx<'_>) -> ConditionChecklist {
        ConditionChecklist::default()
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

fn build_engine(strategies: Vec<(BoxedStrategy, StrategyTuning)>) -> (Engine, TestHandles) {
    let db = spawn_db(Store::open_in_memory().unwrap());
    let status = Arc::new(StatusStore::new());
    let stream = Arc::new(StreamStore::new());
    let alerts = Arc::new(AlertManager::new(
        AlertsConfig {
            enabled: false,
            ..Default::default()
        },
        db.clone(),
    ));

    let capacities: HashMap<Interval, usize> = [(EXEC, 2000), (TREND, 2000)].into();
    let buffers = KlineBufferManager::new(&capacities);

    // Modest leverage keeps the liquidation price well below the scripted
    // stops (at 20x it would sit between entry and a 5%-wide stop)
    let broker = SimBroker::new(
        "BTCUSDT",
        SimParams {
            initial_capital: 1000.0,
            max_leverage: 5.0,
            fee_rate: 0.0004,
        },
        RiskParams::default(),
        IdGen::default(),
    );

    let specs = strategies
        .into_iter()
        .map(|(strategy, tuning)| StrategySpec {
            strategy,
            indicator_config: IndicatorConfig::default(),
            initial_capital: 1000.0,
            cooldown_after_stop: tuning.cooldown_after_stop,
            swing_lookback: tuning.swing_lookback,
        })
        .collect();

    let engine = Engine::new(
        EngineConfig {
            symbol: "BTCUSDT".to_string(),
            intervals: vec![EXEC, TREND],
            exec_interval: EXEC,
            trend_interval: TREND,
        },
        buffers,
        broker,
        specs,
        db.clone(),
        Arc::clone(&status),
        Arc::clone(&stream),
        alerts,
    );

    (
        engine,
        TestHandles {
            db,
            status,
            stream,
        },
    )
}

struct TestHandles {
    db: DbHandle,
    status: Arc<StatusStore>,
    stream: Arc<StreamStore>,
}

fn scripted(id: &str, stop_distance: f64) -> (BoxedStrategy, StrategyTuning) {
    (
        Box::new(ScriptedStrategy::new(id, stop_distance)),
        StrategyTuning::default(),
    )
}

fn exec_bar(i: i64, open: f64, high: f64, low: f64, close: f64, closed: bool) -> Bar {
    Bar {
        interval: EXEC,
        open_time: i * EXEC.duration_ms(),
        close_time: (i + 1) * EXEC.duration_ms() - 1,
        open,
        high,
        low,
        close,
        volume: 10.0,
        trades: 100,
        is_closed: closed,
        source: BarSource::Ws,
    }
}

fn trend_bar(i: i64, close: f64) -> Bar {
    Bar {
        interval: TREND,
        open_time: i * TREND.duration_ms(),
        close_time: (i + 1) * TREND.duration_ms() - 1,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 40.0,
        trades: 400,
        is_closed: true,
        source: BarSource::Ws,
    }
}

/// Flat commit at `close` (no wicks beyond 0.1, never touches triggers).
fn quiet_commit(i: i64, close: f64) -> BarEvent {
    BarEvent::Commit(exec_bar(i, close, close + 0.1, close - 0.1, close, true))
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn entry_fill_writes_trade_ledger_equity() {
    let (mut engine, h) = build_engine(vec![scripted("default", 5.0)]);

    engine.handle_event(quiet_commit(0, 100.0)).await;
    h.db.flush().await;

    let trades = h.db.trades_page("default", 10, 0).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].kind, TradeKind::Entry);
    assert!(trades[0].qty > 0.0);
    // fee = notional * fee_rate, debited once in the ledger
    let fee = trades[0].notional * trades[0].fee_rate;
    let ledger = h.db.ledger_page("default", 10, 0).await.unwrap();
    let fee_rows: Vec<_> = ledger
        .iter()
        .filter(|l| l.entry_type == LedgerType::Fee)
        .collect();
    assert_eq!(fee_rows.len(), 1);
    assert!((fee_rows[0].amount + fee).abs() < 1e-9);

    // status reflects the open position with stop below entry, targets at 1R/2R
    let status = h.status.get("default").unwrap();
    let pos = status.position.unwrap();
    assert_eq!(pos.side, PositionSide::Long);
    assert!(pos.stop_price < pos.entry_price);
    let r = pos.entry_price - pos.stop_price;
    assert!((pos.tp1_price - (pos.entry_price + r)).abs() < 1e-9);
    assert!((pos.tp2_price - (pos.entry_price + 2.0 * r)).abs() < 1e-9);

    // open position row persisted
    let row = h.db.open_position("BTCUSDT", "default").await.unwrap().unwrap();
    assert_eq!(row.status, PositionStatus::Open);

    // equity identities hold
    assert!((status.equity - (status.balance + status.upl)).abs() < 1e-9);
    assert!((status.free_margin - (status.equity - status.margin_used)).abs() < 1e-9);
}

#[tokio::test]
async fn tp1_breakeven_then_stop_nets_half_r_minus_fees() {
    let (mut engine, h) = build_engine(vec![scripted("default", 5.0)]);

    // Entry at 100: stop 95, tp1 105, tp2 110
    engine.handle_event(quiet_commit(0, 100.0)).await;
    let entry_qty = h.status.get("default").unwrap().position.unwrap().qty;

    // Up-bar preview sweeps tp1: half closes, stop moves to breakeven
    engine
        .handle_event(BarEvent::Preview(exec_bar(
            1, 103.0, 105.5, 102.0, 105.2, false,
        )))
        .await;
    let status = h.status.get("default").unwrap();
    let pos = status.position.unwrap();
    assert!((pos.qty - entry_qty / 2.0).abs() < 1e-9);
    assert_eq!(pos.stop_price, pos.entry_price);

    // Down-bar preview hits the breakeven stop: remainder exits at entry
    engine
        .handle_event(BarEvent::Preview(exec_bar(
            1, 101.0, 101.5, 99.5, 99.8, false,
        )))
        .await;
    let status = h.status.get("default").unwrap();
    assert!(status.position.is_none());

    h.db.flush().await;
    let trades = h.db.trades_page("default", 10, 0).await.unwrap();
    assert_eq!(trades.len(), 3); // entry + tp1 + stop

    // Net realized = 0.5 * (tp1 - entry) * qty - all fees
    let ledger = h.db.ledger_page("default", 20, 0).await.unwrap();
    let ledger_sum: f64 = ledger.iter().map(|l| l.amount).sum();
    assert!((1000.0 + ledger_sum - status.balance).abs() < 1e-9);

    let pnl_sum: f64 = ledger
        .iter()
        .filter(|l| l.entry_type == LedgerType::RealizedPnl)
        .map(|l| l.amount)
        .sum();
    assert!((pnl_sum - 0.5 * 5.0 * entry_qty).abs() < 1e-6);

    // Stop-out starts the cooldown: the very next commit may not re-enter
    engine.handle_event(quiet_commit(1, 100.0)).await;
    h.db.flush().await;
    let trades = h.db.trades_page("default", 10, 0).await.unwrap();
    assert_eq!(trades.len(), 3, "cooldown must block re-entry");

    // After cooldown_after_stop bars have elapsed the strategy re-enters
    for i in 2..6 {
        engine.handle_event(quiet_commit(i, 100.0)).await;
    }
    h.db.flush().await;
    let trades = h.db.trades_page("default", 10, 0).await.unwrap();
    assert_eq!(trades.len(), 4);
    assert_eq!(trades[0].kind, TradeKind::Entry);
}

#[tokio::test]
async fn tp2_in_one_sweep_records_both_targets() {
    let (mut engine, h) = build_engine(vec![scripted("default", 5.0)]);

    engine.handle_event(quiet_commit(0, 100.0)).await;
    // One violent up-bar through both targets
    engine
        .handle_event(BarEvent::Preview(exec_bar(
            1, 104.0, 111.0, 103.0, 110.5, false,
        )))
        .await;

    assert!(h.status.get("default").unwrap().position.is_none());

    h.db.flush().await;
    let trades = h.db.trades_page("default", 10, 0).await.unwrap();
    assert_eq!(trades.len(), 3);
    // newest first: tp2, tp1, entry
    assert_eq!(trades[0].reason, "tp2");
    assert_eq!(trades[1].reason, "tp1");
    assert_eq!(trades[2].kind, TradeKind::Entry);

    let row = h.db.open_position("BTCUSDT", "default").await.unwrap();
    assert!(row.is_none());
}

#[tokio::test]
async fn trend_failure_exit_has_no_cooldown() {
    let mut s = ScriptedStrategy::new("default", 5.0);
    s.exit_on_next_commit = Some(CloseReason::TrendFail);
    let (mut engine, h) = build_engine(vec![(Box::new(s), StrategyTuning::default())]);

    engine.handle_event(quiet_commit(0, 100.0)).await; // entry
    engine.handle_event(quiet_commit(1, 101.0)).await; // trend_fail exit at 101

    h.db.flush().await;
    let trades = h.db.trades_page("default", 10, 0).await.unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].reason, "trend_fail");
    assert_eq!(trades[0].price, 101.0);

    // No cooldown after a trend failure: next commit re-enters immediately
    engine.handle_event(quiet_commit(2, 100.5)).await;
    h.db.flush().await;
    let trades = h.db.trades_page("default", 10, 0).await.unwrap();
    assert_eq!(trades.len(), 3);
    assert_eq!(trades[0].kind, TradeKind::Entry);
}

#[tokio::test]
async fn duplicate_commits_are_idempotent() {
    let (mut engine, h) = build_engine(vec![scripted("default", 5.0)]);

    let bar = quiet_commit(0, 100.0);
    engine.handle_event(bar.clone()).await;
    engine.handle_event(bar).await; // repair re-delivery

    h.db.flush().await;
    let trades = h.db.trades_page("default", 10, 0).await.unwrap();
    assert_eq!(trades.len(), 1, "stale duplicate must not re-trigger");
}

#[tokio::test]
async fn concurrent_strategies_stay_isolated_and_reset_is_scoped() {
    let (mut engine, h) = build_engine(vec![scripted("alpha", 5.0), scripted("beta", 10.0)]);

    // Identical market events for both instances
    engine.handle_event(quiet_commit(0, 100.0)).await;
    // Sweep to 96: inside alpha's stop (95) range? no; low 94.5 hits alpha's
    // stop (95) but not beta's (90)
    engine
        .handle_event(BarEvent::Preview(exec_bar(
            1, 99.0, 99.5, 94.5, 94.8, false,
        )))
        .await;

    let alpha = h.status.get("alpha").unwrap();
    let beta = h.status.get("beta").unwrap();
    assert!(alpha.position.is_none(), "alpha stopped out");
    assert!(beta.position.is_some(), "beta still holds");

    h.db.flush().await;
    assert_eq!(h.db.trades_page("alpha", 10, 0).await.unwrap().len(), 2);
    assert_eq!(h.db.trades_page("beta", 10, 0).await.unwrap().len(), 1);

    // Reset alpha; beta is untouched
    let (reply, rx) = oneshot::channel();
    engine
        .handle_command(EngineCommand::ResetStrategy {
            strategy: "alpha".to_string(),
            reply,
        })
        .await;
    rx.await.unwrap().unwrap();

    assert!(h.db.trades_page("alpha", 10, 0).await.unwrap().is_empty());
    assert_eq!(h.db.trades_page("beta", 10, 0).await.unwrap().len(), 1);
    assert_eq!(h.status.get("alpha").unwrap().balance, 1000.0);
    assert!(h.status.get("beta").unwrap().position.is_some());

    // Stream events for alpha are gone too
    let frame = h.stream.frame();
    let evs = frame["ev"].as_array().unwrap();
    assert!(evs.iter().all(|e| e["sid"] != "alpha"));
}

#[tokio::test]
async fn warmup_uptrend_produces_indicators_but_no_trades() {
    // Scenario: steady uptrend from 100 to 130 over 300 execution bars with
    // small dips. The real strategy sees a trending book but never a valid
    // pullback entry, so no trades appear.
    let tuning = StrategyTuning::default();
    let strategy = create_strategy("trend_pullback", "default", tuning.clone(), EXEC, TREND)
        .unwrap();
    let (mut engine, h) = build_engine(vec![(strategy, tuning)]);

    let mut trend_i = 0i64;
    for i in 0..300i64 {
        let base = 100.0 + 0.1 * i as f64;
        // small rhythmic dip keeps RSI off the 100 pin
        let close = base + if i % 5 == 4 { -0.12 } else { 0.0 };
        let bar = exec_bar(i, close - 0.05, close + 0.15, close - 0.2, close, true);
        engine.handle_event(BarEvent::Commit(bar)).await;

        if (i + 1) % 4 == 0 {
            engine
                .handle_event(BarEvent::Commit(trend_bar(trend_i, close)))
                .await;
            trend_i += 1;
        }
    }

    h.db.flush().await;
    let trades = h.db.trades_page("default", 10, 0).await.unwrap();
    assert!(trades.is_empty(), "uptrend without pullback must not trade");

    // Indicator history replays to a trending state
    let bars = h.db.recent_klines("BTCUSDT", EXEC, 400).await.unwrap();
    assert_eq!(bars.len(), 300);
    let mut set = indicators::IndicatorSet::new(&IndicatorConfig::default());
    let mut last = None;
    for bar in &bars {
        last = set.commit(bar);
    }
    let snap = last.expect("indicators must be warm after 300 bars");
    assert!(snap.ema_fast > snap.ema_slow);
    assert!(snap.rsi > 50.0 && snap.rsi <= 100.0);
}

#[tokio::test]
async fn invariant_violation_quarantines_strategy() {
    // The quarantine path is triggered through the broker: a second entry
    // while one is open is an invariant violation. Other instances keep
    // running.
    struct DoubleEnter {
        inner: ScriptedStrategy,
    }
    impl Strategy for DoubleEnter {
        fn id(&self) -> &str {
            self.inner.id()
        }
        fn kind(&self) -> &'static str {
            "scripted"
        }
        fn on_bar_commit(&mut self, ctx: &EvalCtx<'_>) -> Option<StrategyIntent> {
            // Ignores its own position state: enters every commit
            let entry = ctx.bar.close;
            Some(StrategyIntent::Enter(EntrySignal {
                side: PositionSide::Long,
                entry_price: entry,
                stop_price: entry - 5.0,
                tp1_price: entry + 5.0,
                tp2_price: entry + 10.0,
                reason: "signal_long".to_string(),
            }))
        }
        fn on_bar_preview(&mut self, _ctx: &EvalCtx<'_>) -> Option<ExitAction> {
            None
        }
        fn describe_conditions(&self, _ctx: &EvalCtx<'_>) -> ConditionChecklist {
            ConditionChecklist::default()
        }
    }

    let double = DoubleEnter {
        inner: ScriptedStrategy::new("double", 5.0),
    };
    let (mut engine, h) = build_engine(vec![
        (Box::new(double), StrategyTuning::default()),
        scripted("healthy", 5.0),
    ]);

    engine.handle_event(quiet_commit(0, 100.0)).await; // both enter
    engine.handle_event(quiet_commit(1, 100.5)).await; // double re-enters -> quarantined

    h.db.flush().await;

    // The healthy instance keeps receiving events and holding its position
    assert!(h.status.get("healthy").unwrap().position.is_some());
    // The quarantined one stopped producing new trades after its violation
    let double_trades = h.db.trades_page("double", 10, 0).await.unwrap();
    assert_eq!(double_trades.len(), 1);

    engine.handle_event(quiet_commit(2, 101.0)).await;
    h.db.flush().await;
    assert_eq!(h.db.trades_page("double", 10, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn funding_applies_once_per_funding_time() {
    let (mut engine, h) = build_engine(vec![scripted("default", 5.0)]);

    engine.handle_event(quiet_commit(0, 100.0)).await;
    h.db.flush().await;

    engine
        .handle_command(EngineCommand::ApplyFunding {
            rate: 0.0001,
            funding_time_ms: 1_700_000_000_000,
        })
        .await;
    h.db.flush().await;

    // Same funding timestamp a second time: deduplicated by ledger ref
    engine
        .handle_command(EngineCommand::ApplyFunding {
            rate: 0.0001,
            funding_time_ms: 1_700_000_000_000,
        })
        .await;
    h.db.flush().await;

    let ledger = h.db.ledger_page("default", 20, 0).await.unwrap();
    let funding_rows: Vec<_> = ledger
        .iter()
        .filter(|l| l.entry_type == LedgerType::Funding)
        .collect();
    assert_eq!(funding_rows.len(), 1);
    assert!(funding_rows[0].amount > 0.0); // long pays in at positive rate here
}
