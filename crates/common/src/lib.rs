//! Shared utilities: reconnect backoff, logging bootstrap, wall-clock time.

mod backoff;
mod logging;
mod time;

pub use backoff::ExponentialBackoff;
pub use logging::init_logging;
pub use time::now_ms;
