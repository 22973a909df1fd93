//! # Vol Allocator
//!
//! Signal aggregation and volatility-indexed portfolio allocation engine.
//! Independent strategy sources emit expiring directional signals; the
//! engine turns the live signal set into per-instrument allocation targets,
//! sized by a volatility-regime indicator and the portfolio's drawdown
//! state.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `signal`: Signal/target types and per-source ledgers
//! - `allocation`: Weight assignment and target compilation
//! - `risk`: Portfolio risk state and the short-weight sizing curve
//! - `stats`: Deviation bands and the annual recalibration trigger
//! - `history`: History provider seam with bounded lookback widening
//! - `engine`: Tick orchestration tying everything together

pub mod allocation;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod risk;
pub mod signal;
pub mod stats;

pub use config::Config;
pub use engine::{Engine, MarketTick};
pub use error::EngineError;
pub use signal::{Direction, Signal, Target};
