//! Exchange REST client: paged historical klines and funding rates.

mod client;
mod error;
mod responses;

pub use client::{BinanceRestClient, KLINES_PAGE_LIMIT};
pub use error::RestError;
pub use responses::{parse_kline_row, FundingRate};
