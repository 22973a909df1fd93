//! Annual statistical recalibration of the volatility-index bands.
//!
//! Once per calendar year (plus on cold start) the trailing history of the
//! reference index is reduced to mean/standard-deviation bands over raw
//! levels and over day-over-day percent change. The bands feed the
//! short-weight sizing curve's regime split.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::info;

/// Standard-deviation offset multipliers for the spot-level bands.
const SPOT_OFFSETS: [f64; 10] = [-1.0, -0.5, 0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5];

/// Standard-deviation offset multipliers for the percent-change bands.
const CHANGE_OFFSETS: [i32; 8] = [-3, -2, -1, 0, 1, 2, 3, 4];

/// Standard-deviation-derived threshold sets for the reference index.
///
/// Replaced wholesale by each recalibration pass; consumers always see one
/// coherent set, never a partial mix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviationBands {
    /// Raw index levels at `mean + i·σ` for i ∈ {-1, -0.5, …, 3.5}.
    pub spot: Vec<Decimal>,
    /// Day-over-day percent change at `mean + i·σ` for i ∈ {-3, …, 4},
    /// in percent terms.
    pub change: Vec<Decimal>,
}

impl DeviationBands {
    /// The spot band used as the sizing-regime threshold, if computed.
    pub fn regime_threshold(&self, band_index: usize) -> Option<Decimal> {
        self.spot.get(band_index).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.spot.is_empty()
    }
}

/// Fires the annual band recomputation.
///
/// Arms when the date reaches the first weekday strictly after the calendar
/// anchor (default January 3rd) and fires on the first tick dated at least
/// one day later, so the new year's data is fully available even when the
/// cooldown day falls on a weekend. Also fires once unconditionally at
/// startup.
#[derive(Debug)]
pub struct Recalibrator {
    anchor_month: u32,
    anchor_day: u32,
    armed: bool,
    startup: bool,
}

impl Recalibrator {
    pub fn new(anchor_month: u32, anchor_day: u32) -> Self {
        Self {
            anchor_month,
            anchor_day,
            armed: false,
            startup: true,
        }
    }

    /// Check the trigger condition for `today`. Returns true when a
    /// recalibration should run now.
    pub fn check(&mut self, today: NaiveDate) -> bool {
        let anchor = NaiveDate::from_ymd_opt(today.year(), self.anchor_month, self.anchor_day)
            .map(next_weekday);

        if anchor == Some(today) {
            self.armed = true;
        }

        let cooldown_over =
            self.armed && anchor.is_some_and(|a| today >= a + Duration::days(1));

        if cooldown_over || self.startup {
            self.armed = false;
            self.startup = false;
            return true;
        }

        false
    }

    /// Compute fresh deviation bands from trailing daily closes.
    ///
    /// Returns a complete band set to be swapped in atomically by the caller.
    pub fn recalibrate(closes: &[Decimal]) -> DeviationBands {
        let levels: Vec<f64> = closes.iter().filter_map(|c| c.to_f64()).collect();
        let changes: Vec<f64> = levels
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();

        let (level_mean, level_std) = mean_std(&levels);
        let (change_mean, change_std) = mean_std(&changes);

        let spot = SPOT_OFFSETS
            .iter()
            .filter_map(|i| Decimal::from_f64(level_mean + i * level_std))
            .map(|d| d.round_dp(2))
            .collect();

        let change = CHANGE_OFFSETS
            .iter()
            .filter_map(|i| Decimal::from_f64((change_mean + f64::from(*i) * change_std) * 100.0))
            .map(|d| d.round_dp(2))
            .collect();

        let bands = DeviationBands { spot, change };
        info!(
            observations = closes.len(),
            spot = ?bands.spot,
            change = ?bands.change,
            "recomputed volatility-index deviation bands"
        );
        bands
    }
}

/// Population mean and standard deviation.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// The first weekday strictly after `date`.
pub fn next_weekday(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next += Duration::days(1);
    }
    next
}
