//! HTTP + WebSocket surface.
//!
//! Read endpoints serve the fan-out stores and the DAO; the only mutating
//! endpoint (strategy reset) is forwarded to the engine loop, which owns the
//! state. WebSocket sessions push coalesced frames at the configured cadence.

mod error;
mod routes;
mod state;
mod ws;

pub use error::ApiError;
pub use routes::api_router;
pub use state::{AppState, PushInterval};
