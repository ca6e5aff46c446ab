//! The engine event loop.

use std::collections::HashMap;
use std::sync::Arc;

use alerts::AlertManager;
use common::now_ms;
use connector_core::EventReceiver;
use execution_sim::{FillReport, SimBroker, SimError};
use fanout::{StatusStore, StreamEvent, StreamStore, StrategyStatus};
use kline_buffer::{BufferError, KlineBufferManager};
use model::{Bar, BarEvent, CloseReason, Interval, LedgerType, TradeKind};
use storage::{DbHandle, PositionRow, WriteOp};
use strategy_core::{ConditionChecklist, EvalCtx, ExitAction, IndicatorView, StrategyIntent, TrendView};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::command::EngineCommand;
use crate::error::EngineError;
use crate::instance::{StrategyInstance, StrategySpec};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbol: String,
    pub intervals: Vec<Interval>,
    /// Entry decisions and cooldowns run on this interval.
    pub exec_interval: Interval,
    /// The higher-timeframe filter interval.
    pub trend_interval: Interval,
}

/// Output of evaluating one instance against one event.
struct Evaluation {
    idx: usize,
    intent: Option<StrategyIntent>,
    conditions: Option<ConditionChecklist>,
    snapshot: Option<indicators::IndicatorSnapshot>,
}

pub struct Engine {
    cfg: EngineConfig,
    buffers: KlineBufferManager,
    instances: Vec<StrategyInstance>,
    broker: SimBroker,
    db: DbHandle,
    status: Arc<StatusStore>,
    stream: Arc<StreamStore>,
    alerts: Arc<AlertManager>,
    last_price: f64,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: EngineConfig,
        buffers: KlineBufferManager,
        broker: SimBroker,
        specs: Vec<StrategySpec>,
        db: DbHandle,
        status: Arc<StatusStore>,
        stream: Arc<StreamStore>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        let intervals = cfg.intervals.clone();
        let instances = specs
            .into_iter()
            .map(|spec| StrategyInstance::new(spec, &intervals))
            .collect();
        Self {
            cfg,
            buffers,
            instances,
            broker,
            db,
            status,
            stream,
            alerts,
            last_price: 0.0,
        }
    }

    /// `(id, kind)` for every registered instance.
    pub fn strategy_ids(&self) -> Vec<(String, String)> {
        self.instances
            .iter()
            .map(|i| (i.id().to_string(), i.strategy.kind().to_string()))
            .collect()
    }

    /// Load recovered state: open positions and last persisted balances.
    /// Missed ticks between shutdown and restart are not simulated.
    pub async fn restore(&mut self) -> Result<(), EngineError> {
        for idx in 0..self.instances.len() {
            let sid = self.instances[idx].id().to_string();

            if let Some(eq) = self.db.latest_equity(&sid).await? {
                self.instances[idx].account.state.balance = eq.balance;
            }

            if let Some(row) = self.db.open_position(&self.cfg.symbol, &sid).await? {
                let state = row.to_state();
                info!(
                    strategy = %sid,
                    position_id = state.position_id,
                    side = state.side.as_str(),
                    qty = state.qty,
                    "restored open position"
                );
                self.instances[idx].strategy.on_restore(&state);
                self.instances[idx].account.position = Some(state);
            }
        }
        Ok(())
    }

    /// Replay the warmed buffers through every instance's indicator sets and
    /// publish initial status.
    pub fn prime_from_buffers(&mut self) {
        let buffers = &self.buffers;
        for inst in &mut self.instances {
            for (&interval, set) in inst.indicators.iter_mut() {
                if let Ok(buffer) = buffers.buffer(interval) {
                    for bar in buffer.iter().filter(|b| b.is_closed) {
                        set.commit(bar);
                    }
                }
            }
        }

        if let Ok(buffer) = self.buffers.buffer(self.cfg.exec_interval) {
            if let Some(tail) = buffer.tail() {
                self.last_price = tail.close;
            }
        }
        let price = self.last_price;
        for inst in &mut self.instances {
            inst.account.refresh(price);
            self.status.update(
                inst.id(),
                StrategyStatus::from_account(
                    &inst.account.state,
                    inst.account.position.as_ref(),
                    inst.cooldown_bars,
                ),
            );
        }
        info!(price = price, "engine primed from history");
    }

    /// Run until shutdown. Drains in-flight events and flushes the DAO on
    /// the way out.
    pub async fn run(
        mut self,
        mut event_rx: EventReceiver,
        mut command_rx: mpsc::Receiver<EngineCommand>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        info!(
            strategies = self.instances.len(),
            symbol = %self.cfg.symbol,
            "engine loop started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("shutdown signal received");
                        break;
                    }
                }

                Some(cmd) = command_rx.recv() => {
                    self.handle_command(cmd).await;
                }

                event = event_rx.recv() => {
                    match event {
                        Some(ev) => self.handle_event(ev).await,
                        None => {
                            warn!("event channel closed");
                            break;
                        }
                    }
                }
            }
        }

        // Drain whatever the source already delivered, then flush
        while let Ok(ev) = event_rx.try_recv() {
            self.handle_event(ev).await;
        }
        self.db
            .write(WriteOp::SetAppState {
                key: "last_shutdown_ms".to_string(),
                value: now_ms().to_string(),
                updated_at: now_ms(),
            })
            .await;
        self.db.flush().await;

        info!("engine loop stopped");
        Ok(())
    }

    pub async fn handle_event(&mut self, event: BarEvent) {
        match event {
            BarEvent::Commit(bar) => self.handle_commit(bar).await,
            BarEvent::Preview(bar) => self.handle_preview(bar).await,
        }
    }

    async fn handle_commit(&mut self, bar: Bar) {
        match self.buffers.buffer_mut(bar.interval) {
            Ok(buffer) => {
                // A commit for a bar the buffer already closed is a repair
                // re-delivery: persistence is idempotent and the pipeline
                // must not advance twice
                if let Some(tail) = buffer.tail() {
                    if tail.open_time == bar.open_time && tail.is_closed {
                        debug!(open_time = bar.open_time, "ignoring duplicate commit");
                        return;
                    }
                }
                match buffer.append_or_replace_last(bar.clone()) {
                    Ok(_) => {}
                    Err(BufferError::OutOfOrder { incoming, tail }) => {
                        debug!(incoming = incoming, tail = tail, "ignoring stale commit");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "buffer rejected commit");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, interval = %bar.interval, "commit for unknown interval");
                return;
            }
        }
        self.last_price = bar.close;

        self.db
            .write(WriteOp::UpsertKline {
                symbol: self.cfg.symbol.clone(),
                bar: bar.clone(),
                created_at: now_ms(),
            })
            .await;

        let evaluations = self.evaluate_instances(&bar, true);
        self.settle_evaluations(evaluations, &bar, true).await;
    }

    async fn handle_preview(&mut self, bar: Bar) {
        match self.buffers.buffer_mut(bar.interval) {
            Ok(buffer) => {
                // Never let a live revision reopen a bar that already
                // committed
                if let Some(tail) = buffer.tail() {
                    if tail.is_closed && tail.open_time >= bar.open_time {
                        debug!(open_time = bar.open_time, "ignoring stale preview");
                        return;
                    }
                }
                if buffer.append_or_replace_last(bar.clone()).is_err() {
                    debug!("ignoring stale preview");
                    return;
                }
            }
            Err(_) => return,
        }
        self.last_price = bar.close;

        let evaluations = self.evaluate_instances(&bar, false);
        self.settle_evaluations(evaluations, &bar, false).await;
    }

    /// Stage 2+3 of the pipeline: advance indicators and let every healthy
    /// instance look at the event. Intents are collected and settled after
    /// the loop, so no instance observes another's fills for the same bar.
    fn evaluate_instances(&mut self, bar: &Bar, is_commit: bool) -> Vec<Evaluation> {
        let exec_interval = self.cfg.exec_interval;
        let trend_interval = self.cfg.trend_interval;
        let buffers = &self.buffers;
        let trend_close = buffers
            .buffer(trend_interval)
            .ok()
            .and_then(|b| b.last_closed(1).last().map(|last| last.close));

        let mut evaluations = Vec::with_capacity(self.instances.len());

        for (idx, inst) in self.instances.iter_mut().enumerate() {
            if inst.quarantined {
                continue;
            }

            let swing = swing_levels(buffers, exec_interval, inst.swing_lookback);

            let StrategyInstance {
                strategy,
                account,
                indicators,
                cooldown_bars,
                ..
            } = inst;

            let snapshot = if is_commit {
                indicators
                    .get_mut(&bar.interval)
                    .and_then(|set| set.commit(bar))
            } else {
                indicators.get(&bar.interval).and_then(|set| set.preview(bar))
            };

            let ind_view = indicators.get(&bar.interval).and_then(|set| {
                if is_commit {
                    IndicatorView::committed(set)
                } else {
                    IndicatorView::previewed(set, bar)
                }
            });

            let trend_view = indicators.get(&trend_interval).and_then(|set| {
                Some(TrendView {
                    ind: *set.current()?,
                    close: trend_close?,
                })
            });

            let ctx = EvalCtx {
                interval: bar.interval,
                bar,
                ind: ind_view,
                trend: trend_view,
                position: account.position.as_ref(),
                cooldown_bars_remaining: *cooldown_bars,
                account: &account.state,
                swing_low: swing.0,
                swing_high: swing.1,
            };

            let intent = if is_commit {
                strategy.on_bar_commit(&ctx)
            } else {
                strategy.on_bar_preview(&ctx).map(StrategyIntent::Exit)
            };

            let conditions = (bar.interval == exec_interval)
                .then(|| strategy.describe_conditions(&ctx));

            evaluations.push(Evaluation {
                idx,
                intent,
                conditions,
                snapshot,
            });
        }

        evaluations
    }

    /// Stages 4-6: matcher, DAO, fan-out, in pipeline order.
    async fn settle_evaluations(&mut self, evaluations: Vec<Evaluation>, bar: &Bar, is_commit: bool) {
        let exec_interval = self.cfg.exec_interval;

        for eval in evaluations {
            let sid = self.instances[eval.idx].id().to_string();

            if bar.interval == exec_interval {
                self.stream.update_kline(&sid, bar);
                if let Some(snapshot) = eval.snapshot.or_else(|| {
                    // Preview events carry a transient snapshot
                    self.instances[eval.idx]
                        .indicators
                        .get(&bar.interval)
                        .and_then(|set| set.preview(bar))
                }) {
                    self.stream.update_indicators(&sid, snapshot);
                }
                if let Some(conditions) = eval.conditions {
                    self.stream.update_conditions(&sid, conditions);
                }
            }

            match eval.intent {
                Some(StrategyIntent::Enter(signal)) => {
                    if is_commit {
                        self.apply_entry(eval.idx, &sid, signal).await;
                    } else {
                        // Previews must never open; treat as a broken strategy
                        self.quarantine(eval.idx, "entry intent on preview event")
                            .await;
                        continue;
                    }
                }
                Some(StrategyIntent::Exit(action)) => {
                    self.apply_exit(eval.idx, &sid, action).await;
                }
                None => {}
            }

            // One execution bar has fully elapsed: tick down the cooldown
            if is_commit && bar.interval == exec_interval {
                let inst = &mut self.instances[eval.idx];
                if inst.cooldown_bars > 0 {
                    inst.cooldown_bars -= 1;
                }
            }

            self.publish_status(eval.idx, bar.close);

            if is_commit && !self.instances[eval.idx].quarantined {
                let inst = &self.instances[eval.idx];
                let snapshot = model::EquitySnapshot {
                    strategy: sid.clone(),
                    ts_ms: now_ms(),
                    balance: inst.account.state.balance,
                    equity: inst.account.state.equity,
                    upl: inst.account.state.upl,
                    margin_used: inst.account.state.margin_used,
                    free_margin: inst.account.state.free_margin,
                };
                self.db.write(WriteOp::InsertEquity(snapshot)).await;
            }
        }
    }

    async fn apply_entry(&mut self, idx: usize, sid: &str, signal: strategy_core::EntrySignal) {
        let now = now_ms();
        let result = {
            let broker = &self.broker;
            let inst = &mut self.instances[idx];
            broker.open_position(&mut inst.account, sid, &signal, now)
        };

        match result {
            Ok(report) => {
                if let Some(pos) = &report.position {
                    self.db
                        .write(WriteOp::UpsertPosition(PositionRow::open(
                            sid,
                            &self.cfg.symbol,
                            pos,
                            now,
                        )))
                        .await;
                }
                self.persist_fill(&report).await;

                self.stream.push_event(StreamEvent::Entry {
                    sid: sid.to_string(),
                    side: signal.side,
                    price: signal.entry_price,
                    ts: now,
                    reason: signal.reason.clone(),
                });
                self.stream.push_event(StreamEvent::Trade {
                    sid: sid.to_string(),
                    trade: report.trade.clone(),
                });

                self.spawn_alert(
                    sid,
                    "INFO",
                    format!("ENTRY[{}]", sid),
                    format!("{} @ {}", signal.side.as_str(), signal.entry_price),
                    format!("entry_{}", sid),
                );
            }
            Err(e) => {
                self.quarantine(idx, &format!("entry rejected: {}", e)).await;
            }
        }
    }

    async fn apply_exit(&mut self, idx: usize, sid: &str, action: ExitAction) {
        let now = now_ms();
        let result = {
            let broker = &self.broker;
            let inst = &mut self.instances[idx];
            broker.close_by_action(&mut inst.account, sid, &action, now)
        };

        let fills = match result {
            Ok(fills) => fills,
            Err(SimError::NoPosition) => {
                warn!(strategy = %sid, "exit intent without open position, ignoring");
                return;
            }
            Err(e) => {
                self.quarantine(idx, &format!("exit rejected: {}", e)).await;
                return;
            }
        };

        for fill in fills {
            self.settle_exit_fill(idx, sid, &fill, now).await;
        }
    }

    async fn settle_exit_fill(&mut self, idx: usize, sid: &str, fill: &FillReport, now: i64) {
        // Position row: partial updates keep it OPEN, final fills close it
        if let Some(pos) = &fill.position {
            self.db
                .write(WriteOp::UpsertPosition(PositionRow::open(
                    sid,
                    &self.cfg.symbol,
                    pos,
                    now,
                )))
                .await;
        } else if let (Some(reason), Some(state)) = (fill.close_reason, &fill.closed_state) {
            self.db
                .write(WriteOp::UpsertPosition(PositionRow::closed(
                    sid,
                    &self.cfg.symbol,
                    state,
                    reason,
                    now,
                )))
                .await;
        }
        self.persist_fill(fill).await;

        let side = fill
            .closed_state
            .as_ref()
            .or(fill.position.as_ref())
            .map(|p| p.side)
            .unwrap_or(model::PositionSide::Long);
        let price = fill.trade.price;

        match (fill.close_reason, fill.trade.kind) {
            (None, TradeKind::Exit) => {
                // Partial: the first target fired
                self.stream.push_event(StreamEvent::Tp1 {
                    sid: sid.to_string(),
                    side,
                    price,
                    ts: now,
                });
            }
            (Some(CloseReason::Tp2), _) => {
                self.stream.push_event(StreamEvent::Tp2 {
                    sid: sid.to_string(),
                    side,
                    price,
                    ts: now,
                });
            }
            (Some(CloseReason::Liq), _) => {
                self.stream.push_event(StreamEvent::Liq {
                    sid: sid.to_string(),
                    price,
                    ts: now,
                });
            }
            (Some(reason), _) => {
                self.stream.push_event(StreamEvent::Exit {
                    sid: sid.to_string(),
                    side,
                    price,
                    ts: now,
                    reason: reason.as_str().to_string(),
                });
            }
            _ => {}
        }
        self.stream.push_event(StreamEvent::Trade {
            sid: sid.to_string(),
            trade: fill.trade.clone(),
        });

        // Stop-outs start the cooldown; trend failures and targets do not
        if fill.close_reason == Some(CloseReason::Stop) {
            let inst = &mut self.instances[idx];
            inst.cooldown_bars = inst.cooldown_after_stop;
        }

        let label = fill
            .close_reason
            .map(|r| r.as_str().to_uppercase())
            .unwrap_or_else(|| "TP1".to_string());
        self.spawn_alert(
            sid,
            "INFO",
            format!("{}[{}]", label, sid),
            format!("@ {}", price),
            format!("{}_{}", label.to_lowercase(), sid),
        );
    }

    async fn persist_fill(&self, fill: &FillReport) {
        self.db.write(WriteOp::InsertTrade(fill.trade.clone())).await;
        for row in &fill.ledger {
            self.db.write(WriteOp::InsertLedger(row.clone())).await;
        }
        self.db.write(WriteOp::InsertEquity(fill.equity.clone())).await;
    }

    fn publish_status(&mut self, idx: usize, price: f64) {
        let inst = &mut self.instances[idx];
        if inst.quarantined {
            return;
        }
        inst.account.refresh(price);
        self.status.update(
            inst.id(),
            StrategyStatus::from_account(
                &inst.account.state,
                inst.account.position.as_ref(),
                inst.cooldown_bars,
            ),
        );
    }

    async fn quarantine(&mut self, idx: usize, reason: &str) {
        let inst = &mut self.instances[idx];
        inst.quarantined = true;
        let sid = inst.id().to_string();
        error!(strategy = %sid, reason = %reason, "strategy quarantined, account frozen");
        self.spawn_alert(
            &sid,
            "ERROR",
            format!("QUARANTINE[{}]", sid),
            reason.to_string(),
            format!("quarantine_{}", sid),
        );
    }

    pub async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::ResetStrategy { strategy, reply } => {
                let result = self.reset_strategy(&strategy).await;
                let _ = reply.send(result.map_err(|e| e.to_string()));
            }
            EngineCommand::ApplyFunding {
                rate,
                funding_time_ms,
            } => {
                self.apply_funding(rate, funding_time_ms).await;
            }
        }
    }

    /// Wipe one strategy: persisted rows and in-memory account, atomically
    /// from the API caller's point of view. Other strategies are untouched.
    async fn reset_strategy(&mut self, sid: &str) -> Result<(), EngineError> {
        let Some(idx) = self.instances.iter().position(|i| i.id() == sid) else {
            return Err(EngineError::UnknownStrategy(sid.to_string()));
        };

        self.db.reset_strategy(sid).await?;

        let inst = &mut self.instances[idx];
        inst.account.reset();
        inst.cooldown_bars = 0;
        inst.quarantined = false;
        self.stream.reset_strategy(sid);
        let price = self.last_price;
        self.publish_status(idx, price);

        info!(strategy = %sid, "strategy reset");
        Ok(())
    }

    async fn apply_funding(&mut self, rate: f64, funding_time_ms: i64) {
        let r#ref = funding_time_ms.to_string();

        for idx in 0..self.instances.len() {
            if self.instances[idx].quarantined
                || self.instances[idx].account.position.is_none()
            {
                continue;
            }
            let sid = self.instances[idx].id().to_string();

            match self
                .db
                .has_ledger_ref(&sid, LedgerType::Funding, &r#ref)
                .await
            {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "funding dedup check failed, skipping");
                    continue;
                }
            }

            let price = if self.last_price > 0.0 {
                self.last_price
            } else {
                self.instances[idx]
                    .account
                    .position
                    .as_ref()
                    .map(|p| p.entry_price)
                    .unwrap_or(0.0)
            };

            let applied = {
                let broker = &self.broker;
                let inst = &mut self.instances[idx];
                broker.apply_funding(&mut inst.account, &sid, rate, funding_time_ms, price, now_ms())
            };

            if let Some((ledger, equity)) = applied {
                let amount = ledger.amount;
                self.db.write(WriteOp::InsertLedger(ledger)).await;
                self.db.write(WriteOp::InsertEquity(equity)).await;
                self.publish_status(idx, price);
                self.spawn_alert(
                    &sid,
                    "INFO",
                    format!("FUNDING[{}]", sid),
                    format!("rate={} pnl={:.4}", rate, amount),
                    format!("funding_{}_{}", sid, funding_time_ms),
                );
            }
        }
    }

    fn spawn_alert(&self, sid: &str, level: &str, title: String, message: String, dedup: String) {
        let alerts = Arc::clone(&self.alerts);
        let sid = sid.to_string();
        let level = level.to_string();
        tokio::spawn(async move {
            alerts
                .alert(&sid, &level, &title, &message, Some(&dedup))
                .await;
        });
    }
}

/// Lowest low and highest high over the last `lookback` closed bars of the
/// execution interval, for structural stops.
fn swing_levels(
    buffers: &KlineBufferManager,
    exec_interval: Interval,
    lookback: usize,
) -> (Option<f64>, Option<f64>) {
    let Ok(buffer) = buffers.buffer(exec_interval) else {
        return (None, None);
    };
    let mut low: Option<f64> = None;
    let mut high: Option<f64> = None;
    for bar in buffer.last_closed(lookback) {
        low = Some(low.map_or(bar.low, |v: f64| v.min(bar.low)));
        high = Some(high.map_or(bar.high, |v: f64| v.max(bar.high)));
    }
    (low, high)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swing_levels_over_closed_bars() {
        let mut caps = HashMap::new();
        caps.insert(Interval::M15, 100);
        let mut buffers = KlineBufferManager::new(&caps);

        for i in 0..5 {
            let close = 100.0 + i as f64;
            buffers
                .buffer_mut(Interval::M15)
                .unwrap()
                .append_or_replace_last(Bar {
                    interval: Interval::M15,
                    open_time: i * 900_000,
                    close_time: (i + 1) * 900_000 - 1,
                    open: close,
                    high: close + 2.0,
                    low: close - 2.0,
                    close,
                    volume: 1.0,
                    trades: 1,
                    is_closed: true,
                    source: model::BarSource::Rest,
                })
                .unwrap();
        }

        let (low, high) = swing_levels(&buffers, Interval::M15, 3);
        // last 3 closed bars: closes 102..104 -> lows 100..102, highs 104..106
        assert_eq!(low, Some(100.0));
        assert_eq!(high, Some(106.0));

        let (low, _) = swing_levels(&buffers, Interval::H1, 3);
        assert_eq!(low, None);
    }
}
