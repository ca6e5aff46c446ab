//! Paper-trading engine runner.
//!
//! Wires the whole pipeline together: REST warmup, the live kline stream,
//! the engine loop with its strategies, the SQLite writer, the funding
//! poller, and the HTTP/WebSocket surface. Shuts down cleanly on Ctrl+C:
//! the source stops, the engine drains in-flight events and flushes the DAO.

mod config;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use alerts::AlertManager;
use api::{api_router, AppState, PushInterval};
use axum::Router;
use binance_rest::BinanceRestClient;
use connector_binance::run_connector;
use connector_core::{create_event_channel, SourceConfig};
use engine::strategies::create_strategy;
use engine::{run_funding_task, warmup_all, Engine, EngineCommand, EngineConfig, StrategySpec};
use execution_sim::{IdGen, SimBroker};
use fanout::{StatusStore, StreamStore};
use kline_buffer::{compute_min_bars, compute_warmup_bars, IndicatorLengths, KlineBufferManager};
use metrics::create_metrics;
use model::Interval;
use storage::{spawn_db, Store};
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::config::load_settings;

/// Interval for periodic health status logging.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

fn print_usage() {
    eprintln!("Usage: paper-perp [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>   Config file (default: ./configs/config.yaml)");
    eprintln!("  --help            Show this help message");
    eprintln!();
    eprintln!("Environment variables override config keys with '__' as the");
    eprintln!("separator, e.g. BINANCE__SYMBOL=ETHUSDT, API__PORT=9000.");
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    match dotenvy::dotenv() {
        Ok(path) => eprintln!("Loaded environment from: {}", path.display()),
        Err(dotenvy::Error::Io(_)) => {} // No .env file, that's fine
        Err(e) => eprintln!("Warning: failed to load .env file: {}", e),
    }

    common::init_logging();

    let mut config_path = "./configs/config.yaml".to_string();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config_path = args.next().unwrap_or_else(|| {
                    eprintln!("--config requires a path");
                    std::process::exit(1);
                });
            }
            "--help" | "-h" => {
                print_usage();
                return;
            }
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                std::process::exit(1);
            }
        }
    }

    let settings = match load_settings(&config_path) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, path = %config_path, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let intervals: Vec<Interval> = settings
        .binance
        .intervals
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    if intervals.is_empty() {
        error!("no valid intervals configured");
        std::process::exit(1);
    }
    // Shortest interval drives execution, longest carries the trend filter
    let exec_interval = *intervals.iter().min().unwrap();
    let trend_interval = *intervals.iter().max().unwrap();

    info!(
        symbol = %settings.binance.symbol,
        intervals = ?settings.binance.intervals,
        exec = %exec_interval,
        trend = %trend_interval,
        "starting paper trading engine"
    );

    // Storage: a single writer thread owns the SQLite handle
    let store = match Store::open(&settings.storage.sqlite_path) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, path = %settings.storage.sqlite_path, "failed to open database");
            std::process::exit(1);
        }
    };
    let db = spawn_db(store);

    if let Ok(Some(last)) = db.app_state_get("last_shutdown_ms").await {
        info!(
            last_shutdown_ms = %last,
            "previous run found; ticks missed while down are not simulated"
        );
    }

    let status = Arc::new(StatusStore::new());
    let stream = Arc::new(StreamStore::new());
    let alert_manager = Arc::new(AlertManager::new(settings.alerts.clone(), db.clone()));

    // Buffers sized for the worst indicator warmup or the configured cap
    let lengths = IndicatorLengths {
        ema_fast: settings.indicators.ema_fast,
        ema_slow: settings.indicators.ema_slow,
        rsi: settings.indicators.rsi,
        macd_fast: settings.indicators.macd_fast,
        macd_slow: settings.indicators.macd_slow,
        macd_signal: settings.indicators.macd_signal,
        atr: settings.indicators.atr,
    };
    let min_bars = compute_min_bars(&lengths);
    let warmup_bars = compute_warmup_bars(
        min_bars,
        settings.kline_cache.warmup_buffer_mult,
        settings.kline_cache.warmup_extra_bars,
    );
    let capacity = warmup_bars.max(settings.kline_cache.max_bars);

    let capacities: HashMap<Interval, usize> =
        intervals.iter().map(|iv| (*iv, capacity)).collect();
    let mut buffers = KlineBufferManager::new(&capacities);

    let rest = match BinanceRestClient::new(&settings.binance.rest_base) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to build REST client");
            std::process::exit(1);
        }
    };

    let bars_needed: HashMap<Interval, usize> =
        intervals.iter().map(|iv| (*iv, warmup_bars)).collect();
    let warmup_report = match warmup_all(
        &db,
        &rest,
        &mut buffers,
        &settings.binance.symbol,
        &intervals,
        &bars_needed,
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "warmup failed");
            std::process::exit(1);
        }
    };

    // Broker ids continue after whatever a previous run persisted
    let (max_pos, max_trade) = db.max_ids().await.unwrap_or((0, 0));
    let broker = SimBroker::new(
        &settings.binance.symbol,
        settings.sim,
        settings.risk.clone(),
        IdGen::new(max_pos, max_trade),
    );

    // Build strategy instances from config
    let mut specs = Vec::new();
    let mut indicator_configs = HashMap::new();
    for entry in settings.strategy_entries() {
        let tuning = entry.params.clone().unwrap_or_else(|| settings.strategy.clone());
        let strategy = match create_strategy(
            &entry.kind,
            &entry.id,
            tuning.clone(),
            exec_interval,
            trend_interval,
        ) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, id = %entry.id, "failed to build strategy");
                std::process::exit(1);
            }
        };
        indicator_configs.insert(entry.id.clone(), settings.indicators);
        specs.push(StrategySpec {
            strategy,
            indicator_config: settings.indicators,
            initial_capital: entry
                .initial_capital
                .unwrap_or(settings.sim.initial_capital),
            cooldown_after_stop: tuning.cooldown_after_stop,
            swing_lookback: tuning.swing_lookback,
        });
    }

    let engine_cfg = EngineConfig {
        symbol: settings.binance.symbol.clone(),
        intervals: intervals.clone(),
        exec_interval,
        trend_interval,
    };
    let mut engine = Engine::new(
        engine_cfg,
        buffers,
        broker,
        specs,
        db.clone(),
        Arc::clone(&status),
        Arc::clone(&stream),
        Arc::clone(&alert_manager),
    );

    if let Err(e) = engine.restore().await {
        error!(error = %e, "failed to restore persisted state");
        std::process::exit(1);
    }
    engine.prime_from_buffers();

    let strategies = engine.strategy_ids();
    let default_strategy = strategies
        .first()
        .map(|(id, _)| id.clone())
        .unwrap_or_else(|| "default".to_string());

    // Channels and shutdown plumbing
    let (event_tx, event_rx) = create_event_channel(1024);
    let (command_tx, command_rx) = mpsc::channel::<EngineCommand>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let source_metrics = create_metrics();

    // Market source task
    let source_config = SourceConfig {
        symbol: settings.binance.symbol.clone(),
        intervals: intervals.clone(),
        rest_base: settings.binance.rest_base.clone(),
        ws_base: settings.binance.ws_base.clone(),
        channel_capacity: 1024,
        idle_timeout: Duration::from_secs(60),
        max_repair_failures: 3,
    };
    let connector_handle = tokio::spawn({
        let rest = Arc::clone(&rest);
        let shutdown_rx = shutdown_rx.clone();
        let metrics = source_metrics.clone();
        let tails = warmup_report.tails.clone();
        async move {
            if let Err(e) =
                run_connector(source_config, rest, tails, event_tx, shutdown_rx, metrics).await
            {
                error!(error = %e, "market source error");
            }
        }
    });

    // Funding poller task
    tokio::spawn(run_funding_task(
        Arc::clone(&rest),
        settings.binance.symbol.clone(),
        command_tx.clone(),
        shutdown_rx.clone(),
    ));

    // Engine loop task
    let engine_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            if let Err(e) = engine.run(event_rx, command_rx, shutdown_rx).await {
                error!(error = %e, "engine error");
            }
        }
    });

    // Periodic health reporter
    tokio::spawn({
        let metrics = source_metrics.clone();
        let alerts = Arc::clone(&alert_manager);
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
            let mut was_degraded = false;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let snapshot = metrics.snapshot();
                        let health = snapshot.health_status();
                        info!(
                            status = %health,
                            previews = snapshot.previews_received,
                            commits = snapshot.commits_received,
                            errors = snapshot.websocket_errors + snapshot.parse_errors,
                            reconnects = snapshot.reconnect_attempts,
                            repaired = snapshot.repaired_bars,
                            "health check"
                        );
                        if snapshot.degraded && !was_degraded {
                            alerts
                                .alert(
                                    "engine",
                                    "WARN",
                                    "SOURCE DEGRADED",
                                    "gap repair failing, serving stale state",
                                    Some("source_degraded"),
                                )
                                .await;
                        }
                        was_degraded = snapshot.degraded;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    });

    // HTTP + WebSocket surface
    let push_interval: PushInterval = settings
        .api
        .ws_push_interval
        .parse()
        .unwrap_or(PushInterval::Raw);
    let app_state = Arc::new(AppState {
        db: db.clone(),
        status: Arc::clone(&status),
        stream: Arc::clone(&stream),
        commands: command_tx.clone(),
        strategies,
        default_strategy,
        indicator_configs,
        symbol: settings.binance.symbol.clone(),
        exec_interval,
        push_interval,
    });

    let router = api_router();
    let app: Router = if settings.api.base_path.is_empty() {
        Router::new().merge(router)
    } else {
        Router::new().nest(&settings.api.base_path, router)
    }
    .layer(CorsLayer::permissive())
    .with_state(app_state);

    let addr: SocketAddr = match format!("{}:{}", settings.api.host, settings.api.port).parse() {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "invalid api bind address");
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = %addr, "failed to bind api listener");
            std::process::exit(1);
        }
    };
    info!(addr = %addr, "api listening");

    let server_shutdown = {
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            let _ = shutdown_rx.changed().await;
        }
    };
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown)
            .await
        {
            error!(error = %e, "api server error");
        }
    });

    // Ctrl+C begins the drain: source stops, engine finishes in-flight
    // events, DAO flushes, subscribers close.
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received Ctrl+C, initiating shutdown");
        let _ = shutdown_tx.send(true);
    }

    let _ = engine_handle.await;
    let _ = connector_handle.await;
    let _ = server_handle.await;
    db.flush().await;

    let snapshot = source_metrics.snapshot();
    println!("\n{}", snapshot);

    if snapshot.parse_errors > 0 {
        warn!(parse_errors = snapshot.parse_errors, "session saw malformed messages");
    }
    info!("shutdown complete");
}
