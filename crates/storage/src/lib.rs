//! Persistence DAO.
//!
//! A single writer task owns the SQLite handle; every other task talks to it
//! through [`DbHandle`]. Writes are idempotent by natural key (klines upsert
//! on `(symbol, interval, open_time)`, positions on `position_id`), the rest
//! of the tables are pure append.

mod handle;
mod rows;
mod schema;
mod store;

pub use handle::{spawn_db, DbHandle, WriteOp};
pub use rows::{AlertRow, PositionRow, PositionStatus};
pub use store::{Store, StoreError};
