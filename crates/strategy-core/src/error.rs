use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("unknown strategy type: {0}")]
    UnknownType(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: String, reason: String },
}
