//! Error types for the trailing-stop core

use thiserror::Error;

use crate::trailing::TrailingState;
use crate::types::BarValidationError;

/// Coarse classification of a [`TrailingError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfig,
    InvalidPrice,
    InvalidState,
    InvalidPosition,
    InvalidBar,
}

/// Validation failures surfaced synchronously by the controller and its inputs.
///
/// None of these are retried internally.
#[derive(Debug, Error)]
pub enum TrailingError {
    #[error("invalid trailing config: {0}")]
    InvalidConfig(String),

    #[error("price must be finite and > 0, got {0}")]
    InvalidPrice(f64),

    #[error("operation not allowed in state {state}")]
    InvalidState { state: TrailingState },

    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error(transparent)]
    InvalidBar(#[from] BarValidationError),
}

impl TrailingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::InvalidPrice(_) => ErrorKind::InvalidPrice,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::InvalidPosition(_) => ErrorKind::InvalidPosition,
            Self::InvalidBar(_) => ErrorKind::InvalidBar,
        }
    }
}

pub type TrailingResult<T> = Result<T, TrailingError>;

/// Reject NaN, infinities and non-positive prices
pub(crate) fn check_price(price: f64) -> TrailingResult<f64> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(TrailingError::InvalidPrice(price))
    }
}
