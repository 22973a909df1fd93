//! Engine error taxonomy.
//!
//! Sizing and weight-resolution problems degrade to log lines inside the
//! engine; history problems surface as typed values for the caller to retry
//! or abort on. None of these halt the tick pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The history collaborator failed outright.
    #[error("history source error: {0}")]
    History(anyhow::Error),

    /// The venue kept under-returning after the widening bound was hit.
    #[error(
        "history for {symbol} still short of {requested} bars after widening the lookback to {widened_to}"
    )]
    InsufficientHistory {
        symbol: String,
        requested: usize,
        widened_to: usize,
    },
}
