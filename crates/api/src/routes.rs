use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use indicators::{chart_hints, IndicatorSet};
use model::Interval;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws;

// ── Query params ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StrategyQuery {
    #[serde(default)]
    strategy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KlinesQuery {
    #[serde(default)]
    interval: Option<String>,
    #[serde(default = "default_kline_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default = "default_kline_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default = "default_page_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_kline_limit() -> usize {
    500
}

fn default_page_limit() -> usize {
    100
}

// ── Router ───────────────────────────────────────────────────────────────

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/strategies", get(get_strategies))
        .route("/api/status", get(get_status))
        .route("/api/klines", get(get_klines))
        .route("/api/indicator_history", get(get_indicator_history))
        .route("/api/trades", get(get_trades))
        .route("/api/ledger", get(get_ledger))
        .route("/api/equity", get(get_equity))
        .route("/api/conditions", get(get_conditions))
        .route("/api/db/reset", post(post_db_reset))
        .route("/ws/status", get(ws::ws_status))
        .route("/ws/stream", get(ws::ws_stream))
}

fn resolve_strategy(state: &AppState, requested: Option<&str>) -> Result<String, ApiError> {
    let sid = requested.unwrap_or(&state.default_strategy);
    if !state.knows_strategy(sid) {
        return Err(ApiError::NotFound(format!("unknown strategy: {}", sid)));
    }
    Ok(sid.to_string())
}

fn parse_interval(state: &AppState, raw: Option<&str>) -> Result<Interval, ApiError> {
    match raw {
        None => Ok(state.exec_interval),
        Some(s) => s
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("unknown interval: {}", s))),
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn get_strategies(State(state): State<Arc<AppState>>) -> Json<Value> {
    let items: Vec<Value> = state
        .strategies
        .iter()
        .map(|(id, kind)| json!({ "id": id, "type": kind }))
        .collect();
    Json(json!({ "items": items, "default": state.default_strategy }))
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StrategyQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = resolve_strategy(&state, q.strategy.as_deref())?;
    let status = state
        .status
        .get(&sid)
        .ok_or_else(|| ApiError::NotFound(format!("no status yet for {}", sid)))?;
    Ok(Json(serde_json::to_value(status)?))
}

async fn get_klines(
    State(state): State<Arc<AppState>>,
    Query(q): Query<KlinesQuery>,
) -> Result<Json<Value>, ApiError> {
    let interval = parse_interval(&state, q.interval.as_deref())?;
    let limit = q.limit.clamp(1, 2000);
    let bars = state.db.recent_klines(&state.symbol, interval, limit).await?;
    Ok(Json(json!({ "items": bars })))
}

/// Replays the persisted klines through a fresh indicator engine, which keeps
/// the served series identical to what the live engine committed.
async fn get_indicator_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = resolve_strategy(&state, q.strategy.as_deref())?;
    let interval = parse_interval(&state, q.interval.as_deref())?;
    let limit = q.limit.clamp(1, 2000);

    let cfg = state
        .indicator_configs
        .get(&sid)
        .copied()
        .unwrap_or_default();

    // Fetch enough extra bars to seed the indicators before the window
    let warmup = cfg.min_warmup_bars();
    let bars = state
        .db
        .recent_klines(&state.symbol, interval, limit + warmup * 3)
        .await?;

    let mut set = IndicatorSet::new(&cfg);
    let mut series: Vec<Value> = Vec::new();
    for bar in bars.iter().filter(|b| b.is_closed) {
        if let Some(snap) = set.commit(bar) {
            series.push(serde_json::to_value(snap)?);
        }
    }
    let skip = series.len().saturating_sub(limit);
    let items: Vec<Value> = series.into_iter().skip(skip).collect();

    let hints: Value = chart_hints()
        .iter()
        .map(|h| {
            (
                h.field.to_string(),
                json!({ "panel": h.panel, "kind": h.kind }),
            )
        })
        .collect::<serde_json::Map<String, Value>>()
        .into();

    Ok(Json(json!({ "items": items, "hints": hints })))
}

async fn get_trades(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = resolve_strategy(&state, q.strategy.as_deref())?;
    let rows = state
        .db
        .trades_page(&sid, q.limit.clamp(1, 1000), q.offset)
        .await?;
    Ok(Json(json!({ "items": rows })))
}

async fn get_ledger(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = resolve_strategy(&state, q.strategy.as_deref())?;
    let rows = state
        .db
        .ledger_page(&sid, q.limit.clamp(1, 1000), q.offset)
        .await?;
    Ok(Json(json!({ "items": rows })))
}

async fn get_equity(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = resolve_strategy(&state, q.strategy.as_deref())?;
    let rows = state
        .db
        .equity_page(&sid, q.limit.clamp(1, 1000), q.offset)
        .await?;
    Ok(Json(json!({ "items": rows })))
}

async fn get_conditions(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    Ok(Json(serde_json::to_value(state.stream.conditions())?))
}

/// Wipe one strategy's history and account. Scoped strictly to the given id;
/// the engine performs the delete and the in-memory reset together.
async fn post_db_reset(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StrategyQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = resolve_strategy(&state, q.strategy.as_deref())?;

    let (reply, rx) = oneshot::channel();
    state
        .commands
        .send(engine::EngineCommand::ResetStrategy {
            strategy: sid.clone(),
            reply,
        })
        .await
        .map_err(|_| ApiError::Internal("engine unavailable".to_string()))?;

    match rx.await {
        Ok(Ok(())) => Ok(Json(json!({ "ok": true, "strategy": sid }))),
        Ok(Err(e)) => Err(ApiError::Internal(e)),
        Err(_) => Err(ApiError::Internal("engine dropped reset request".to_string())),
    }
}
