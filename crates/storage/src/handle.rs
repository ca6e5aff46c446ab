//! The writer task and its async handle.
//!
//! One OS thread owns the [`Store`]; everything else sends it requests.
//! Writes are fire-and-forget and retried with bounded backoff; after
//! persistent failure the task flips to in-memory-only mode (writes are
//! dropped, reads still served) and stays there. Dropped writes are not
//! replayed when storage recovers.

use std::time::Duration;

use model::{Bar, EquitySnapshot, Interval, LedgerRecord, LedgerType, TradeRecord};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::rows::{AlertRow, PositionRow};
use crate::store::{Store, StoreError};

const WRITE_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(200);
const REQUEST_QUEUE: usize = 4096;

/// A fire-and-forget mutation.
#[derive(Debug)]
pub enum WriteOp {
    UpsertKline { symbol: String, bar: Bar, created_at: i64 },
    UpsertPosition(PositionRow),
    InsertTrade(TradeRecord),
    InsertLedger(LedgerRecord),
    InsertEquity(EquitySnapshot),
    InsertAlert(AlertRow),
    SetAppState { key: String, value: String, updated_at: i64 },
}

enum Request {
    Write(WriteOp),
    RecentKlines {
        symbol: String,
        interval: Interval,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<Bar>, StoreError>>,
    },
    TradesPage {
        strategy: String,
        limit: usize,
        offset: usize,
        reply: oneshot::Sender<Result<Vec<TradeRecord>, StoreError>>,
    },
    LedgerPage {
        strategy: String,
        limit: usize,
        offset: usize,
        reply: oneshot::Sender<Result<Vec<LedgerRecord>, StoreError>>,
    },
    EquityPage {
        strategy: String,
        limit: usize,
        offset: usize,
        reply: oneshot::Sender<Result<Vec<EquitySnapshot>, StoreError>>,
    },
    OpenPosition {
        symbol: String,
        strategy: String,
        reply: oneshot::Sender<Result<Option<PositionRow>, StoreError>>,
    },
    LatestEquity {
        strategy: String,
        reply: oneshot::Sender<Result<Option<EquitySnapshot>, StoreError>>,
    },
    MaxIds {
        reply: oneshot::Sender<Result<(i64, i64), StoreError>>,
    },
    HasLedgerRef {
        strategy: String,
        entry_type: LedgerType,
        r#ref: String,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
    AppStateGet {
        key: String,
        reply: oneshot::Sender<Result<Option<String>, StoreError>>,
    },
    ResetStrategy {
        strategy: String,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Barrier: replied to once every earlier request has been applied.
    Flush { reply: oneshot::Sender<()> },
}

/// Cloneable async handle to the writer task.
#[derive(Clone)]
pub struct DbHandle {
    tx: mpsc::Sender<Request>,
}

/// Spawn the writer thread over an already-open store.
pub fn spawn_db(store: Store) -> DbHandle {
    let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
    std::thread::Builder::new()
        .name("db-writer".to_string())
        .spawn(move || writer_loop(store, rx))
        .expect("failed to spawn db writer thread");
    DbHandle { tx }
}

fn writer_loop(mut store: Store, mut rx: mpsc::Receiver<Request>) {
    let mut memory_only = false;

    while let Some(req) = rx.blocking_recv() {
        match req {
            Request::Write(op) => {
                if memory_only {
                    continue;
                }
                if apply_with_retry(&store, &op).is_err() {
                    error!(
                        "storage failing persistently, switching to in-memory-only mode; \
                         further writes will be dropped"
                    );
                    memory_only = true;
                }
            }
            Request::RecentKlines { symbol, interval, limit, reply } => {
                let _ = reply.send(store.recent_klines(&symbol, interval, limit));
            }
            Request::TradesPage { strategy, limit, offset, reply } => {
                let _ = reply.send(store.trades_page(&strategy, limit, offset));
            }
            Request::LedgerPage { strategy, limit, offset, reply } => {
                let _ = reply.send(store.ledger_page(&strategy, limit, offset));
            }
            Request::EquityPage { strategy, limit, offset, reply } => {
                let _ = reply.send(store.equity_page(&strategy, limit, offset));
            }
            Request::OpenPosition { symbol, strategy, reply } => {
                let _ = reply.send(store.open_position(&symbol, &strategy));
            }
            Request::LatestEquity { strategy, reply } => {
                let _ = reply.send(store.latest_equity(&strategy));
            }
            Request::MaxIds { reply } => {
                let _ = reply.send(store.max_ids());
            }
            Request::HasLedgerRef { strategy, entry_type, r#ref, reply } => {
                let _ = reply.send(store.has_ledger_ref(&strategy, entry_type, &r#ref));
            }
            Request::AppStateGet { key, reply } => {
                let _ = reply.send(store.app_state_get(&key));
            }
            Request::ResetStrategy { strategy, reply } => {
                let _ = reply.send(store.reset_strategy(&strategy));
            }
            Request::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }

    info!("db writer stopped");
}

fn apply_with_retry(store: &Store, op: &WriteOp) -> Result<(), StoreError> {
    let mut delay = RETRY_DELAY;
    let mut last_err = None;

    for attempt in 1..=WRITE_RETRIES {
        match apply(store, op) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt = attempt, error = %e, "db write failed");
                last_err = Some(e);
                if attempt < WRITE_RETRIES {
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }

    Err(last_err.expect("retry loop always records an error"))
}

fn apply(store: &Store, op: &WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::UpsertKline { symbol, bar, created_at } => {
            store.upsert_kline(symbol, bar, *created_at)
        }
        WriteOp::UpsertPosition(row) => store.upsert_position(row),
        WriteOp::InsertTrade(t) => store.insert_trade(t),
        WriteOp::InsertLedger(l) => store.insert_ledger(l),
        WriteOp::InsertEquity(s) => store.insert_equity(s),
        WriteOp::InsertAlert(a) => store.insert_alert(a),
        WriteOp::SetAppState { key, value, updated_at } => {
            store.app_state_set(key, value, *updated_at)
        }
    }
}

impl DbHandle {
    /// Enqueue a mutation. Never blocks the event loop on storage.
    pub async fn write(&self, op: WriteOp) {
        if self.tx.send(Request::Write(op)).await.is_err() {
            warn!("db writer gone, dropping write");
        }
    }

    /// Best-effort enqueue from sync contexts.
    pub fn try_write(&self, op: WriteOp) {
        if self.tx.try_send(Request::Write(op)).is_err() {
            warn!("db queue full or writer gone, dropping write");
        }
    }

    pub async fn recent_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Bar>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::RecentKlines {
            symbol: symbol.to_string(),
            interval,
            limit,
            reply,
        })
        .await;
        rx.await.unwrap_or_else(|_| Ok(Vec::new()))
    }

    pub async fn trades_page(
        &self,
        strategy: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TradeRecord>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::TradesPage {
            strategy: strategy.to_string(),
            limit,
            offset,
            reply,
        })
        .await;
        rx.await.unwrap_or_else(|_| Ok(Vec::new()))
    }

    pub async fn ledger_page(
        &self,
        strategy: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::LedgerPage {
            strategy: strategy.to_string(),
            limit,
            offset,
            reply,
        })
        .await;
        rx.await.unwrap_or_else(|_| Ok(Vec::new()))
    }

    pub async fn equity_page(
        &self,
        strategy: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EquitySnapshot>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::EquityPage {
            strategy: strategy.to_string(),
            limit,
            offset,
            reply,
        })
        .await;
        rx.await.unwrap_or_else(|_| Ok(Vec::new()))
    }

    pub async fn open_position(
        &self,
        symbol: &str,
        strategy: &str,
    ) -> Result<Option<PositionRow>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::OpenPosition {
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            reply,
        })
        .await;
        rx.await.unwrap_or_else(|_| Ok(None))
    }

    pub async fn latest_equity(&self, strategy: &str) -> Result<Option<EquitySnapshot>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::LatestEquity {
            strategy: strategy.to_string(),
            reply,
        })
        .await;
        rx.await.unwrap_or_else(|_| Ok(None))
    }

    pub async fn max_ids(&self) -> Result<(i64, i64), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::MaxIds { reply }).await;
        rx.await.unwrap_or(Ok((0, 0)))
    }

    pub async fn has_ledger_ref(
        &self,
        strategy: &str,
        entry_type: LedgerType,
        r#ref: &str,
    ) -> Result<bool, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::HasLedgerRef {
            strategy: strategy.to_string(),
            entry_type,
            r#ref: r#ref.to_string(),
            reply,
        })
        .await;
        rx.await.unwrap_or(Ok(false))
    }

    pub async fn app_state_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::AppStateGet {
            key: key.to_string(),
            reply,
        })
        .await;
        rx.await.unwrap_or(Ok(None))
    }

    /// Delete all rows for one strategy. Resolves once committed.
    pub async fn reset_strategy(&self, strategy: &str) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::ResetStrategy {
            strategy: strategy.to_string(),
            reply,
        })
        .await;
        rx.await.unwrap_or(Ok(()))
    }

    /// Wait for every previously enqueued write to land (shutdown barrier).
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Flush { reply }).await;
        let _ = rx.await;
    }

    async fn send(&self, req: Request) {
        if self.tx.send(req).await.is_err() {
            warn!("db writer gone, request dropped");
        }
    }
}
