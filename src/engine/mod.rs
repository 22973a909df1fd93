//! Tick orchestration.
//!
//! One logical tick is processed to completion before the next is admitted:
//! risk state first, then the annual recalibration check, then the
//! short-weight refresh, then target compilation. Every compiled target
//! therefore reflects the freshest weight snapshot.

use crate::allocation::AllocationCompiler;
use crate::config::Config;
use crate::history::{ensure_closes, HistoryProvider, Resolution};
use crate::risk::{self, RiskState};
use crate::signal::{Signal, Target};
use crate::stats::{DeviationBands, Recalibrator};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

/// One unit of market data driving the engine.
#[derive(Debug, Clone)]
pub struct MarketTick {
    pub time: DateTime<Utc>,
    /// Current total portfolio value.
    pub portfolio_value: Decimal,
    /// Latest close of the reference volatility index, when one arrived
    /// with this tick.
    pub index_close: Option<Decimal>,
}

/// The allocation engine: risk state, deviation bands, recalibration
/// trigger and the signal compiler, wired to a history provider.
///
/// Construct one per live or simulated run; nothing is shared between
/// instances.
pub struct Engine<H: HistoryProvider> {
    config: Config,
    history: H,
    risk: RiskState,
    bands: DeviationBands,
    recalibrator: Recalibrator,
    compiler: AllocationCompiler,
}

impl<H: HistoryProvider> Engine<H> {
    pub fn new(config: Config, history: H, initial_portfolio_value: Decimal) -> Self {
        let risk = RiskState::new(&config.allocation, &config.sizing, initial_portfolio_value);
        let recalibrator = Recalibrator::new(
            config.recalibration.anchor_month,
            config.recalibration.anchor_day,
        );
        let compiler = AllocationCompiler::new(config.sources.clone());

        Self {
            config,
            history,
            risk,
            bands: DeviationBands::default(),
            recalibrator,
            compiler,
        }
    }

    /// Process one tick: fold in the portfolio value, recalibrate bands if
    /// the annual trigger holds, refresh the short weight from the index
    /// close, then compile the current signal set into targets.
    ///
    /// Sizing and recalibration failures degrade to log lines; the previous
    /// short weight and bands stay in force.
    pub fn on_tick(&mut self, tick: &MarketTick, signals: &[Signal]) -> Vec<Target> {
        self.risk.update_equity(tick.portfolio_value);

        if self.recalibrator.check(tick.time.date_naive()) {
            match ensure_closes(
                &self.history,
                &self.config.recalibration.index_symbol,
                self.config.recalibration.window,
                Resolution::Daily,
                self.config.recalibration.max_widening,
            ) {
                Ok(closes) => {
                    // Whole-value swap: readers see the old set or the new
                    // one, never a mix.
                    self.bands = Recalibrator::recalibrate(&closes);
                }
                Err(err) => {
                    error!(
                        error = %err,
                        "recalibration failed, keeping previous deviation bands"
                    );
                }
            }
        }

        if let Some(index_close) = tick.index_close {
            match risk::short_weight(index_close, &self.bands, &self.config.sizing) {
                Ok(weight) => self.risk.set_short_weight(weight),
                Err(err) => {
                    warn!(
                        error = %err,
                        "sizing formula domain error, retaining previous short weight"
                    );
                }
            }
        }

        self.compiler.compile(tick.time, signals, &self.risk)
    }

    /// Forward a universe deselection to the compiler.
    pub fn on_universe_change(&mut self, removed: Vec<String>) {
        self.compiler.on_universe_change(removed);
    }

    /// Record the closing portfolio value ahead of the overnight gap.
    pub fn on_market_close(&mut self, portfolio_value: Decimal) {
        self.risk.mark_close(portfolio_value);
    }

    /// Fold the overnight portfolio move into the short weight at the open.
    pub fn on_market_open(&mut self, portfolio_value: Decimal) {
        let offset = self.risk.apply_overnight_offset(portfolio_value);
        info!(
            offset = %offset,
            short_weight = %self.risk.short_weight(),
            "market open, overnight offset applied"
        );
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn bands(&self) -> &DeviationBands {
        &self.bands
    }
}
