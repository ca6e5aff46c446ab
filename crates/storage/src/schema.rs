//! SQLite schema. Time columns are integer milliseconds since epoch.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS klines (
    symbol      TEXT NOT NULL,
    interval    TEXT NOT NULL,
    open_time   INTEGER NOT NULL,
    close_time  INTEGER NOT NULL,
    open        REAL NOT NULL,
    high        REAL NOT NULL,
    low         REAL NOT NULL,
    close       REAL NOT NULL,
    volume      REAL NOT NULL,
    trades      INTEGER NOT NULL,
    is_closed   INTEGER NOT NULL,
    source      TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    PRIMARY KEY (symbol, interval, open_time)
);

CREATE TABLE IF NOT EXISTS positions (
    position_id  INTEGER PRIMARY KEY,
    strategy     TEXT NOT NULL,
    symbol       TEXT NOT NULL,
    side         TEXT NOT NULL,
    qty          REAL NOT NULL,
    entry_price  REAL NOT NULL,
    entry_time   INTEGER NOT NULL,
    leverage     REAL NOT NULL,
    margin       REAL NOT NULL,
    stop_price   REAL NOT NULL,
    tp1_price    REAL NOT NULL,
    tp2_price    REAL NOT NULL,
    status       TEXT NOT NULL,
    realized_pnl REAL NOT NULL,
    fees_total   REAL NOT NULL,
    liq_price    REAL NOT NULL,
    close_time   INTEGER,
    close_reason TEXT,
    updated_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_positions_strategy ON positions (strategy, status);

CREATE TABLE IF NOT EXISTS trades (
    trade_id    INTEGER PRIMARY KEY,
    strategy    TEXT NOT NULL,
    symbol      TEXT NOT NULL,
    position_id INTEGER NOT NULL,
    side        TEXT NOT NULL,
    trade_type  TEXT NOT NULL,
    price       REAL NOT NULL,
    qty         REAL NOT NULL,
    notional    REAL NOT NULL,
    fee_amount  REAL NOT NULL,
    fee_rate    REAL NOT NULL,
    timestamp   INTEGER NOT NULL,
    reason      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_strategy_ts ON trades (strategy, timestamp DESC);

CREATE TABLE IF NOT EXISTS ledger (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy  TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    type      TEXT NOT NULL,
    amount    REAL NOT NULL,
    symbol    TEXT NOT NULL,
    ref       TEXT NOT NULL,
    note      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ledger_strategy_ts ON ledger (strategy, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_ledger_type_ref ON ledger (strategy, type, ref);

CREATE TABLE IF NOT EXISTS equity_snapshots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy    TEXT NOT NULL,
    timestamp   INTEGER NOT NULL,
    balance     REAL NOT NULL,
    equity      REAL NOT NULL,
    upl         REAL NOT NULL,
    margin_used REAL NOT NULL,
    free_margin REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_equity_strategy_ts ON equity_snapshots (strategy, timestamp DESC);

CREATE TABLE IF NOT EXISTS alerts (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy  TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    channel   TEXT NOT NULL,
    level     TEXT NOT NULL,
    message   TEXT NOT NULL,
    dedup_key TEXT
);

CREATE TABLE IF NOT EXISTS app_state (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;
