//! Engine error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid parameters {short_window}/{long_window}: {reason}")]
    InvalidParameter {
        short_window: usize,
        long_window: usize,
        reason: String,
    },

    #[error("Insufficient data: series has {series_len} bars, at least {required} required")]
    InsufficientData { series_len: usize, required: usize },

    #[error("Empty search space: {reason}")]
    EmptySearchSpace { reason: String },

    #[error("Invalid series at bar {index}: {reason}")]
    InvalidSeries { index: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Optimization cancelled")]
    Cancelled,

    #[error("Optimization worker panicked: {0}")]
    WorkerPanic(String),
}

impl EngineError {
    /// A quantity derived from bar `index` does not fit in a `Decimal`
    pub fn overflow(index: usize, quantity: &str) -> Self {
        EngineError::InvalidSeries {
            index,
            reason: format!("{quantity} is outside the decimal range"),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
