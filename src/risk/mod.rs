//! Position-risk state and volatility-indexed sizing.
//!
//! - Tick-driven portfolio risk state: high-water mark, drawdown with a
//!   gain ratchet, margin multiplier
//! - The non-linear short-weight sizing curve over the reference
//!   volatility index

mod sizing;
mod state;

pub use sizing::{short_weight, SizingError};
pub use state::RiskState;
