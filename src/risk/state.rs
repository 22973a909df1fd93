//! Tick-driven portfolio risk state.

use crate::config::{AllocationConfig, SizingConfig};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Process-wide sizing state, one instance per live or simulated run.
///
/// Updated on every market tick before signals are consulted, so each
/// compile cycle sees a fresh margin multiplier and short weight. Invariants:
/// `short_weight` stays clamped in `[floor, cap]`, and `margin_multiplier`
/// never falls below the configured base.
#[derive(Debug, Clone)]
pub struct RiskState {
    initial_value: Decimal,
    /// Portfolio value at the most recent market close, for the overnight
    /// offset.
    closing_value: Decimal,
    high_water_mark: Decimal,
    /// Current drawdown fraction, <= 0 (floor included).
    drawdown_fraction: Decimal,
    /// Non-positive adjustment added to the raw drawdown. The gain ratchet
    /// moves it toward zero and nothing moves it back, so the permitted
    /// drawdown only ever tightens.
    drawdown_floor: Decimal,
    /// Highest locked-in relative gain since inception.
    cumulative_gain: Decimal,
    short_weight: Decimal,
    margin_multiplier: Decimal,
    base_multiplier: Decimal,
    short_weight_floor: Decimal,
    short_weight_cap: Decimal,
}

impl RiskState {
    pub fn new(
        allocation: &AllocationConfig,
        sizing: &SizingConfig,
        initial_value: Decimal,
    ) -> Self {
        Self {
            initial_value,
            closing_value: initial_value,
            high_water_mark: initial_value,
            drawdown_fraction: allocation.initial_drawdown,
            drawdown_floor: allocation.initial_drawdown,
            cumulative_gain: Decimal::ZERO,
            short_weight: sizing
                .initial_short_weight
                .clamp(sizing.short_weight_floor, sizing.short_weight_cap),
            margin_multiplier: allocation.base_margin_multiplier,
            base_multiplier: allocation.base_margin_multiplier,
            short_weight_floor: sizing.short_weight_floor,
            short_weight_cap: sizing.short_weight_cap,
        }
    }

    /// Fold a new portfolio value into the state.
    ///
    /// New highs update the high-water mark and, when the relative gain
    /// since inception exceeds the previously locked-in gain, ratchet the
    /// drawdown floor upward by the delta. Otherwise the drawdown fraction
    /// is recomputed against the mark. The margin multiplier is always
    /// recomputed, never left stale. A zero inception value or mark leaves
    /// the ratio-dependent fields untouched instead of failing.
    pub fn update_equity(&mut self, value: Decimal) {
        if value > self.high_water_mark {
            self.high_water_mark = value;

            if let Some(ratio) = value.checked_div(self.initial_value) {
                let gain = (ratio - Decimal::ONE).round_dp(3);
                if gain > self.cumulative_gain {
                    let delta = gain - self.cumulative_gain;
                    self.drawdown_floor = (self.drawdown_floor + delta).min(Decimal::ZERO);
                    self.cumulative_gain = gain;
                    info!(
                        gain = %gain,
                        floor = %self.drawdown_floor,
                        "locked in new portfolio gain, drawdown floor ratcheted"
                    );
                }
            }
            self.drawdown_fraction = self.drawdown_floor;
        } else if let Some(ratio) = value.checked_div(self.high_water_mark) {
            self.drawdown_fraction = (ratio - Decimal::ONE).round_dp(3) + self.drawdown_floor;
        }

        self.margin_multiplier = self
            .base_multiplier
            .max(self.base_multiplier * (Decimal::ONE + self.drawdown_fraction));
    }

    /// Record the closing portfolio value for the overnight comparison.
    pub fn mark_close(&mut self, value: Decimal) {
        self.closing_value = value;
    }

    /// Shift the short weight by the overnight change in portfolio value.
    ///
    /// A losing night (negative change) raises the weight toward the cap; a
    /// winning night trims it. Returns the measured overnight fraction.
    pub fn apply_overnight_offset(&mut self, open_value: Decimal) -> Decimal {
        if self.closing_value == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let offset = ((open_value / self.closing_value) - Decimal::ONE).round_dp(3);
        self.set_short_weight(self.short_weight - offset);
        debug!(
            offset = %offset,
            short_weight = %self.short_weight,
            "applied overnight offset to short weight"
        );
        offset
    }

    /// Replace the short weight, clamped into the configured bounds.
    pub fn set_short_weight(&mut self, weight: Decimal) {
        self.short_weight = weight.clamp(self.short_weight_floor, self.short_weight_cap);
    }

    pub fn short_weight(&self) -> Decimal {
        self.short_weight
    }

    pub fn margin_multiplier(&self) -> Decimal {
        self.margin_multiplier
    }

    pub fn high_water_mark(&self) -> Decimal {
        self.high_water_mark
    }

    pub fn drawdown_fraction(&self) -> Decimal {
        self.drawdown_fraction
    }

    pub fn drawdown_floor(&self) -> Decimal {
        self.drawdown_floor
    }

    pub fn cumulative_gain(&self) -> Decimal {
        self.cumulative_gain
    }
}
