use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("warmup failed: {0}")]
    Warmup(String),

    #[error("buffer error: {0}")]
    Buffer(#[from] kline_buffer::BufferError),

    #[error("storage error: {0}")]
    Storage(#[from] storage::StoreError),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("strategy error: {0}")]
    Strategy(#[from] strategy_core::StrategyError),
}
