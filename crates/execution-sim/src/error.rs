use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    /// An entry arrived while a position is already open. At most one
    /// position exists per strategy; this is an invariant violation.
    #[error("position already open (id {0})")]
    PositionAlreadyOpen(i64),

    #[error("no open position")]
    NoPosition,

    /// Sizing produced a non-positive quantity.
    #[error("invalid quantity: {0}")]
    InvalidQty(f64),

    /// Entry price must be positive.
    #[error("invalid price: {0}")]
    InvalidPrice(f64),
}
